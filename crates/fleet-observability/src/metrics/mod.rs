//! Metrics collection and export
//!
//! Provides Prometheus-compatible metrics for the reconciliation loop and
//! the default process metrics.

pub mod collectors;
pub mod exporter;
pub mod registry;

pub use collectors::FleetMetrics;
pub use exporter::export_metrics;
pub use registry::MetricsRegistry;

#[cfg(feature = "http")]
pub use exporter::http::{metrics_handler, metrics_router, MetricsState};
