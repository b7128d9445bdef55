//! Reconciliation metrics

use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

/// Metrics for the reconciliation loop and the worker fleet
pub struct FleetMetrics {
    /// Live worker handles in the actual state
    pub workers_active: IntGauge,

    /// Reconciliation ticks by outcome
    pub reconcile_ticks_total: IntCounterVec,

    /// Worker lifecycle operations by operation and outcome
    pub worker_operations_total: IntCounterVec,

    /// Time spent in a tick body, excluding the trailing wait
    pub tick_duration_seconds: Histogram,
}

impl FleetMetrics {
    /// Create and register fleet metrics under `namespace`
    pub fn new(registry: &Registry, namespace: &str) -> Self {
        let workers_active = IntGauge::with_opts(
            Opts::new("workers_active", "Live worker handles").namespace(namespace),
        )
        .expect("Failed to create workers_active metric");
        registry
            .register(Box::new(workers_active.clone()))
            .expect("Failed to register workers_active");

        let reconcile_ticks_total = IntCounterVec::new(
            Opts::new("reconcile_ticks_total", "Reconciliation ticks").namespace(namespace),
            &["outcome"],
        )
        .expect("Failed to create reconcile_ticks_total metric");
        registry
            .register(Box::new(reconcile_ticks_total.clone()))
            .expect("Failed to register reconcile_ticks_total");

        let worker_operations_total = IntCounterVec::new(
            Opts::new("worker_operations_total", "Worker lifecycle operations")
                .namespace(namespace),
            &["operation", "outcome"],
        )
        .expect("Failed to create worker_operations_total metric");
        registry
            .register(Box::new(worker_operations_total.clone()))
            .expect("Failed to register worker_operations_total");

        let tick_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "reconcile_tick_duration_seconds",
                "Reconciliation tick duration",
            )
            .namespace(namespace)
            .buckets(vec![0.005, 0.05, 0.25, 1.0, 2.0, 5.0, 15.0, 60.0]),
        )
        .expect("Failed to create reconcile_tick_duration_seconds metric");
        registry
            .register(Box::new(tick_duration_seconds.clone()))
            .expect("Failed to register reconcile_tick_duration_seconds");

        Self {
            workers_active,
            reconcile_ticks_total,
            worker_operations_total,
            tick_duration_seconds,
        }
    }

    /// Record a finished tick
    pub fn record_tick(&self, outcome: &str, duration_secs: f64) {
        self.reconcile_ticks_total
            .with_label_values(&[outcome])
            .inc();
        self.tick_duration_seconds.observe(duration_secs);
    }

    /// Record a create/replace/remove/close attempt
    pub fn record_operation(&self, operation: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.worker_operations_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn set_active_workers(&self, count: usize) {
        self.workers_active.set(count as i64);
    }
}
