//! Fleet Observability
//!
//! Provides metrics and tracing infrastructure for the fleet daemon.
//!
//! ## Features
//!
//! - **Metrics**: Prometheus registry with process metrics and reconciliation collectors
//! - **Tracing**: `tracing-subscriber` initialisation with human or JSON output
//! - **HTTP** (feature `http`): axum router serving `GET /metrics`

pub mod error;
pub mod metrics;
pub mod tracing;

pub use error::ObservabilityError;
pub use metrics::{export_metrics, FleetMetrics, MetricsRegistry};
#[cfg(feature = "http")]
pub use metrics::{metrics_handler, metrics_router, MetricsState};
pub use tracing::{init_tracing, TracingConfig};
