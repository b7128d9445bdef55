//! Recording fakes of the daemon's collaborators.
//!
//! Every fake appends to a shared [`Journal`] so tests can assert on the
//! exact order of lifecycle calls across collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use fleet_daemon::error::{SinkError, StoreError, WorkerError};
use fleet_daemon::pool::ConnectionPool;
use fleet_daemon::sink::EventSink;
use fleet_daemon::store::{DesiredStateProvider, StoreLifecycle};
use fleet_daemon::worker::{WorkerFactory, WorkerHandle};
use fleet_types::{
    DesiredSnapshot, FleetEventEnvelope, StoreState, StoreStatus, TenantConfig, TenantId, Version,
    WorkerId, WorkerSpec,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Ordered log of collaborator calls
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Build a snapshot from `(tenant, [(worker, version)])` pairs
pub fn snapshot(tenants: &[(&str, &[(&str, &str)])]) -> DesiredSnapshot {
    tenants
        .iter()
        .fold(DesiredSnapshot::empty(), |snapshot, (tenant, workers)| {
            let specs = workers
                .iter()
                .map(|(id, version)| WorkerSpec::new(*id, *version))
                .collect();
            snapshot.with_tenant(TenantConfig::new(*tenant, specs))
        })
}

/// Provider serving whatever snapshot the test sets
#[derive(Default)]
pub struct FakeProvider {
    current: Mutex<Option<Arc<DesiredSnapshot>>>,
    broken: AtomicBool,
    reads: Mutex<Vec<Instant>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_snapshot(snapshot: DesiredSnapshot) -> Arc<Self> {
        let provider = Self::new();
        provider.set(snapshot);
        provider
    }

    pub fn set(&self, snapshot: DesiredSnapshot) {
        *self.current.lock() = Some(Arc::new(snapshot));
    }

    pub fn clear(&self) {
        *self.current.lock() = None;
    }

    /// Make every later read fail
    pub fn break_down(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Times at which the reconciler read a snapshot
    pub fn reads(&self) -> Vec<Instant> {
        self.reads.lock().clone()
    }
}

impl DesiredStateProvider for FakeProvider {
    fn snapshot(&self) -> Result<Option<Arc<DesiredSnapshot>>, StoreError> {
        self.reads.lock().push(Instant::now());
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("fake".to_string()));
        }
        Ok(self.current.lock().clone())
    }
}

/// Factory journaling `create <id>@<version>`
pub struct RecordingFactory {
    journal: Journal,
    failing_creates: Mutex<HashSet<String>>,
    failing_closes: Mutex<HashSet<String>>,
    hanging_creates: Mutex<HashSet<String>>,
    create_delay: Duration,
}

impl RecordingFactory {
    pub fn new(journal: Journal) -> Arc<Self> {
        Self::with_delay(journal, Duration::ZERO)
    }

    /// Every create takes `delay` of (tokio) time
    pub fn with_delay(journal: Journal, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            journal,
            failing_creates: Mutex::new(HashSet::new()),
            failing_closes: Mutex::new(HashSet::new()),
            hanging_creates: Mutex::new(HashSet::new()),
            create_delay: delay,
        })
    }

    /// Fail creates of `id`
    pub fn fail_create(&self, id: &str) {
        self.failing_creates.lock().insert(id.to_string());
    }

    /// Creates of `id` journal `hang <id>@<version>` and never return
    pub fn hang_create(&self, id: &str) {
        self.hanging_creates.lock().insert(id.to_string());
    }

    pub fn heal_create(&self, id: &str) {
        self.failing_creates.lock().remove(id);
    }

    /// Handles created from now on for `id` fail to close
    pub fn fail_close(&self, id: &str) {
        self.failing_closes.lock().insert(id.to_string());
    }
}

#[async_trait]
impl WorkerFactory for RecordingFactory {
    async fn create(
        &self,
        _tenant_id: &TenantId,
        spec: &WorkerSpec,
        _sink: Arc<dyn EventSink>,
    ) -> Result<Box<dyn WorkerHandle>, WorkerError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if self.hanging_creates.lock().contains(spec.id.as_str()) {
            self.journal.push(format!("hang {}@{}", spec.id, spec.version));
            std::future::pending::<()>().await;
        }
        self.journal
            .push(format!("create {}@{}", spec.id, spec.version));

        if self.failing_creates.lock().contains(spec.id.as_str()) {
            return Err(WorkerError::Create(format!("{} refused", spec.id)));
        }

        Ok(Box::new(FakeHandle::new(
            spec.id.as_str(),
            spec.version.as_str(),
            self.journal.clone(),
            self.failing_closes.lock().contains(spec.id.as_str()),
        )))
    }
}

/// Handle journaling `close <id>@<version>`
pub struct FakeHandle {
    id: WorkerId,
    version: Version,
    journal: Journal,
    fail_close: bool,
}

impl FakeHandle {
    pub fn new(id: &str, version: &str, journal: Journal, fail_close: bool) -> Self {
        Self {
            id: WorkerId::new(id),
            version: Version::new(version),
            journal,
            fail_close,
        }
    }

    pub fn boxed(id: &str, version: &str, journal: &Journal) -> Box<dyn WorkerHandle> {
        Box::new(Self::new(id, version, journal.clone(), false))
    }
}

#[async_trait]
impl WorkerHandle for FakeHandle {
    fn worker_id(&self) -> &WorkerId {
        &self.id
    }

    fn version(&self) -> &Version {
        &self.version
    }

    async fn close(&self) -> Result<(), WorkerError> {
        self.journal.push(format!("close {}@{}", self.id, self.version));
        if self.fail_close {
            return Err(WorkerError::Close(format!("{} stuck", self.id)));
        }
        Ok(())
    }
}

/// Sink journaling `sink close`
pub struct RecordingSink {
    journal: Journal,
    events: Mutex<Vec<FleetEventEnvelope>>,
    fail_close: bool,
}

impl RecordingSink {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            events: Mutex::new(Vec::new()),
            fail_close: false,
        })
    }

    pub fn failing(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            events: Mutex::new(Vec::new()),
            fail_close: true,
        })
    }

    pub fn events(&self) -> Vec<FleetEventEnvelope> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn emit(&self, envelope: FleetEventEnvelope) {
        self.events.lock().push(envelope);
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.journal.push("sink close");
        if self.fail_close {
            return Err(SinkError::Writer("flush failed".to_string()));
        }
        Ok(())
    }
}

/// Store journaling `stop <name>`
pub struct RecordingStore {
    name: &'static str,
    journal: Journal,
}

impl RecordingStore {
    pub fn new(name: &'static str, journal: Journal) -> Arc<Self> {
        Arc::new(Self { name, journal })
    }
}

#[async_trait]
impl StoreLifecycle for RecordingStore {
    fn name(&self) -> &str {
        self.name
    }

    fn status(&self) -> StoreStatus {
        let mut status = StoreStatus::loading(self.name);
        status.state = StoreState::Ready;
        status.enabled = true;
        status
    }

    async fn ready(&self) {}

    fn stop(&self) {
        self.journal.push(format!("stop {}", self.name));
    }
}

/// Pool journaling `pool close`
pub struct RecordingPool {
    journal: Journal,
}

impl RecordingPool {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new(Self { journal })
    }
}

#[async_trait]
impl ConnectionPool for RecordingPool {
    fn name(&self) -> &str {
        "recording"
    }

    async fn close(&self) {
        self.journal.push("pool close");
    }
}
