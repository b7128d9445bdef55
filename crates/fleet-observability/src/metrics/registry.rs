//! Central metrics registry

use super::collectors::FleetMetrics;
use prometheus::Registry;
use std::sync::Arc;

/// Central metrics registry for the daemon
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    fleet_metrics: Arc<FleetMetrics>,
}

impl MetricsRegistry {
    /// Create a new metrics registry with default namespace "fleet"
    pub fn new() -> Self {
        Self::with_namespace("fleet")
    }

    /// Create a registry whose fleet collectors live under `namespace`.
    ///
    /// Process metrics keep their conventional unprefixed names.
    pub fn with_namespace(namespace: &str) -> Self {
        let registry = Arc::new(Registry::new());
        register_process_collector(&registry);
        let fleet_metrics = Arc::new(FleetMetrics::new(&registry, namespace));

        Self {
            registry,
            fleet_metrics,
        }
    }

    /// Shared handle to the fleet metrics
    pub fn fleet(&self) -> Arc<FleetMetrics> {
        Arc::clone(&self.fleet_metrics)
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> crate::error::Result<String> {
        super::exporter::export_metrics(&self.registry)
    }

    /// Shared handle to the underlying registry
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn register_process_collector(registry: &Registry) {
    let collector = prometheus::process_collector::ProcessCollector::for_self();
    if let Err(e) = registry.register(Box::new(collector)) {
        tracing::warn!(error = %e, "Failed to register process collector");
    }
}

#[cfg(not(target_os = "linux"))]
fn register_process_collector(_registry: &Registry) {}
