//! Reconciliation loop
//!
//! Every tick reads the cached desired snapshot, diffs it against the
//! actual-state table and creates, replaces or removes workers one id at a
//! time. Failures are contained per worker id; only a failure of the tick
//! itself ends the loop.

use super::actual::{ActualEntry, SharedActualState};
use crate::error::{ReconcileError, WorkerError};
use crate::sink::{record, EventSink};
use crate::store::DesiredStateProvider;
use crate::worker::{WorkerFactory, WorkerHandle};
use fleet_observability::FleetMetrics;
use fleet_types::{EventSource, FleetEvent, TenantId, WorkerId, WorkerSpec};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// What happened to one worker id during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAction {
    Unchanged,
    Created,
    Replaced,
    /// Created after the table was sealed; closed again immediately
    Discarded,
}

/// Counters for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// No snapshot was available; nothing was done
    pub skipped: bool,
    pub unchanged: usize,
    pub created: usize,
    pub replaced: usize,
    pub removed: usize,
    pub failed: usize,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    fn record(&mut self, action: WorkerAction) {
        match action {
            WorkerAction::Unchanged => self.unchanged += 1,
            WorkerAction::Created => self.created += 1,
            WorkerAction::Replaced => self.replaced += 1,
            WorkerAction::Discarded => {}
        }
    }

    /// Whether the tick changed the actual state
    pub fn changed(&self) -> bool {
        self.created + self.replaced + self.removed > 0
    }
}

/// Converges the actual state on the desired state
pub struct Reconciler {
    provider: Arc<dyn DesiredStateProvider>,
    factory: Arc<dyn WorkerFactory>,
    sink: Arc<dyn EventSink>,
    actual: SharedActualState,
    interval: Duration,
    metrics: Option<Arc<FleetMetrics>>,
}

impl Reconciler {
    /// Create a new reconciler
    pub fn new(
        provider: Arc<dyn DesiredStateProvider>,
        factory: Arc<dyn WorkerFactory>,
        sink: Arc<dyn EventSink>,
        actual: SharedActualState,
        interval: Duration,
    ) -> Self {
        Self {
            provider,
            factory,
            sink,
            actual,
            interval,
            metrics: None,
        }
    }

    /// Record tick and operation metrics
    pub fn with_metrics(mut self, metrics: Arc<FleetMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn actual(&self) -> &SharedActualState {
        &self.actual
    }

    /// Run ticks until the stop flag is raised.
    ///
    /// The flag is only looked at between ticks. After each tick the loop
    /// waits for whatever is left of the interval, never less than zero.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> Result<(), ReconcileError> {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Reconciliation loop started");

        loop {
            if *stop.borrow() {
                break;
            }

            let started = Instant::now();
            let report = match self.tick().await {
                Ok(report) => report,
                Err(e) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_tick("failed", started.elapsed().as_secs_f64());
                    }
                    return Err(e);
                }
            };
            let elapsed = started.elapsed();

            if let Some(metrics) = &self.metrics {
                let outcome = if report.skipped { "skipped" } else { "completed" };
                metrics.record_tick(outcome, elapsed.as_secs_f64());
            }
            if report.changed() || report.failed > 0 {
                tracing::info!(
                    created = report.created,
                    replaced = report.replaced,
                    removed = report.removed,
                    failed = report.failed,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Reconciliation tick finished"
                );
            }

            let wait = self.interval.saturating_sub(elapsed);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Reconciliation loop stopped");
        Ok(())
    }

    /// Run a single reconciliation pass
    pub async fn tick(&self) -> Result<TickReport, ReconcileError> {
        let Some(snapshot) = self.provider.snapshot()? else {
            tracing::debug!("No desired snapshot available, skipping tick");
            return Ok(TickReport::skipped());
        };
        if !snapshot.enabled {
            tracing::warn!("Desired state provider reports itself disabled, skipping tick");
            return Ok(TickReport::skipped());
        }

        let resolved = snapshot.resolve_workers();
        if !resolved.duplicates.is_empty() {
            tracing::warn!(
                duplicates = ?resolved.duplicates,
                "Worker ids declared more than once; last declaration wins"
            );
        }

        let mut report = TickReport::default();
        let mut seen: HashSet<WorkerId> = HashSet::with_capacity(resolved.entries.len());

        for (tenant_id, spec) in resolved.entries {
            // Failed ids count as seen so they are retried, not removed
            seen.insert(spec.id.clone());

            let outcome = AssertUnwindSafe(self.reconcile_worker(tenant_id, spec))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(action)) => report.record(action),
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::error!(
                        tenant_id = %tenant_id,
                        worker_id = %spec.id,
                        version = %spec.version,
                        error = %e,
                        "Failed to reconcile worker"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    tracing::error!(
                        tenant_id = %tenant_id,
                        worker_id = %spec.id,
                        version = %spec.version,
                        panic = %panic_message(panic.as_ref()),
                        "Worker reconciliation panicked"
                    );
                }
            }
        }

        let stale: Vec<WorkerId> = {
            let actual = self.actual.lock().await;
            actual
                .ids()
                .into_iter()
                .filter(|id| !seen.contains(id))
                .collect()
        };

        for worker_id in stale {
            let outcome = AssertUnwindSafe(self.remove_worker(&worker_id))
                .catch_unwind()
                .await;
            match outcome {
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(panic) => {
                    report.failed += 1;
                    tracing::error!(
                        worker_id = %worker_id,
                        panic = %panic_message(panic.as_ref()),
                        "Worker removal panicked"
                    );
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_active_workers(self.actual.lock().await.len());
        }

        Ok(report)
    }

    /// Bring one worker id in line with its spec.
    ///
    /// The table lock covers only the map reads and writes. An old handle is
    /// taken out of the table and closed before its replacement is created,
    /// and a handle created after the table was sealed is closed on the spot.
    async fn reconcile_worker(
        &self,
        tenant_id: &TenantId,
        spec: &WorkerSpec,
    ) -> Result<WorkerAction, WorkerError> {
        let old = {
            let mut actual = self.actual.lock().await;
            match actual.version_of(&spec.id).cloned() {
                Some(current) if current == spec.version => {
                    if let Some(previous) = actual.retag(&spec.id, tenant_id) {
                        tracing::info!(
                            worker_id = %spec.id,
                            from_tenant = %previous,
                            to_tenant = %tenant_id,
                            "Worker moved to another tenant"
                        );
                    }
                    return Ok(WorkerAction::Unchanged);
                }
                Some(_) => actual.remove(&spec.id),
                None => None,
            }
        };

        let replacing = old.as_ref().map(|entry| entry.version.clone());
        if let Some(old) = old {
            tracing::info!(
                worker_id = %spec.id,
                from_version = %old.version,
                to_version = %spec.version,
                "Replacing worker"
            );
            self.close_entry(old, "replace").await;
        }

        let handle = self.create_worker(tenant_id, spec).await?;

        let refused = self
            .actual
            .lock()
            .await
            .register(tenant_id.clone(), spec.version.clone(), handle);
        if let Err(handle) = refused {
            tracing::warn!(
                worker_id = %spec.id,
                version = %spec.version,
                "Actual state sealed for shutdown, closing new worker"
            );
            if let Err(e) = handle.close().await {
                tracing::error!(
                    worker_id = %spec.id,
                    version = %spec.version,
                    error = %e,
                    "Failed to close worker created during shutdown"
                );
            }
            return Ok(WorkerAction::Discarded);
        }

        let (action, event) = match replacing {
            Some(from_version) => (
                WorkerAction::Replaced,
                FleetEvent::WorkerReplaced {
                    tenant_id: tenant_id.clone(),
                    worker_id: spec.id.clone(),
                    from_version,
                    to_version: spec.version.clone(),
                },
            ),
            None => (
                WorkerAction::Created,
                FleetEvent::WorkerCreated {
                    tenant_id: tenant_id.clone(),
                    worker_id: spec.id.clone(),
                    version: spec.version.clone(),
                },
            ),
        };
        record(self.sink.as_ref(), event, EventSource::Reconciler);

        Ok(action)
    }

    async fn create_worker(
        &self,
        tenant_id: &TenantId,
        spec: &WorkerSpec,
    ) -> Result<Box<dyn WorkerHandle>, WorkerError> {
        let result = self
            .factory
            .create(tenant_id, spec, Arc::clone(&self.sink))
            .await;
        self.record_operation("create", result.is_ok());

        match &result {
            Ok(handle) => {
                if handle.version() != &spec.version {
                    tracing::warn!(
                        worker_id = %spec.id,
                        version = %spec.version,
                        reported = %handle.version(),
                        "Factory returned a handle reporting a different version"
                    );
                }
                tracing::info!(
                    tenant_id = %tenant_id,
                    worker_id = %spec.id,
                    version = %spec.version,
                    "Created worker"
                );
            }
            Err(e) => record(
                self.sink.as_ref(),
                FleetEvent::WorkerCreateFailed {
                    tenant_id: tenant_id.clone(),
                    worker_id: spec.id.clone(),
                    version: spec.version.clone(),
                    reason: e.to_string(),
                },
                EventSource::Reconciler,
            ),
        }

        result
    }

    /// Close and forget a worker that left the desired state
    async fn remove_worker(&self, worker_id: &WorkerId) -> bool {
        let Some(entry) = self.actual.lock().await.remove(worker_id) else {
            return false;
        };

        tracing::info!(worker_id = %worker_id, version = %entry.version, "Removing worker");
        let version = entry.version.clone();
        self.close_entry(entry, "remove").await;

        record(
            self.sink.as_ref(),
            FleetEvent::WorkerRemoved {
                worker_id: worker_id.clone(),
                version,
            },
            EventSource::Reconciler,
        );
        true
    }

    /// Close a handle that is already out of the table; failures are logged
    async fn close_entry(&self, entry: ActualEntry, operation: &str) {
        let result = entry.handle.close().await;
        self.record_operation(operation, result.is_ok());

        if let Err(e) = result {
            tracing::error!(
                worker_id = %entry.worker_id(),
                version = %entry.version,
                error = %e,
                "Failed to close worker"
            );
            record(
                self.sink.as_ref(),
                FleetEvent::WorkerCloseFailed {
                    worker_id: entry.worker_id().clone(),
                    version: entry.version.clone(),
                    reason: e.to_string(),
                },
                EventSource::Reconciler,
            );
        }
    }

    fn record_operation(&self, operation: &str, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(operation, success);
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::scheduler::ActualState;
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use fleet_types::{DesiredSnapshot, TenantConfig, Version};
    use parking_lot::Mutex;

    struct StaticProvider(Mutex<Option<Arc<DesiredSnapshot>>>);

    impl DesiredStateProvider for StaticProvider {
        fn snapshot(&self) -> Result<Option<Arc<DesiredSnapshot>>, StoreError> {
            Ok(self.0.lock().clone())
        }
    }

    struct Handle(WorkerId, Version);

    #[async_trait]
    impl WorkerHandle for Handle {
        fn worker_id(&self) -> &WorkerId {
            &self.0
        }

        fn version(&self) -> &Version {
            &self.1
        }

        async fn close(&self) -> Result<(), WorkerError> {
            Ok(())
        }
    }

    struct Factory;

    #[async_trait]
    impl WorkerFactory for Factory {
        async fn create(
            &self,
            _tenant_id: &TenantId,
            spec: &WorkerSpec,
            _sink: Arc<dyn EventSink>,
        ) -> Result<Box<dyn WorkerHandle>, WorkerError> {
            if spec.id.as_str() == "boom" {
                panic!("factory exploded");
            }
            Ok(Box::new(Handle(spec.id.clone(), spec.version.clone())))
        }
    }

    fn reconciler(snapshot: DesiredSnapshot, sink: Arc<MemorySink>) -> Reconciler {
        Reconciler::new(
            Arc::new(StaticProvider(Mutex::new(Some(Arc::new(snapshot))))),
            Arc::new(Factory),
            sink,
            ActualState::shared(),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_tick_emits_lifecycle_events() {
        let sink = Arc::new(MemorySink::new());
        let snapshot = DesiredSnapshot::empty()
            .with_tenant(TenantConfig::new("acme", vec![WorkerSpec::new("w1", "v1")]));
        let reconciler = reconciler(snapshot, sink.clone());

        let report = reconciler.tick().await.unwrap();
        assert_eq!(report.created, 1);
        assert!(matches!(
            sink.events().as_slice(),
            [FleetEvent::WorkerCreated { .. }]
        ));
    }

    #[tokio::test]
    async fn test_panicking_factory_is_contained() {
        let sink = Arc::new(MemorySink::new());
        let snapshot = DesiredSnapshot::empty().with_tenant(TenantConfig::new(
            "acme",
            vec![WorkerSpec::new("boom", "v1"), WorkerSpec::new("w2", "v1")],
        ));
        let reconciler = reconciler(snapshot, sink);

        let report = reconciler.tick().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 1);
        assert_eq!(
            reconciler
                .actual()
                .lock()
                .await
                .version_of(&WorkerId::new("w2")),
            Some(&Version::new("v1"))
        );
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
