mod common;

use common::{snapshot, FakeHandle, FakeProvider, Journal, RecordingFactory, RecordingSink};
use fleet_daemon::scheduler::{spawn_reconciler, ActualState, Reconciler, SharedActualState};
use fleet_daemon::shutdown::{self, ListenerHandle, ShutdownCoordinator, ShutdownReason};
use fleet_types::{FleetEvent, TenantId, Version, WorkerId};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const INTERVAL: Duration = Duration::from_secs(2);

struct Harness {
    journal: Journal,
    provider: Arc<FakeProvider>,
    factory: Arc<RecordingFactory>,
    sink: Arc<RecordingSink>,
    actual: SharedActualState,
    reconciler: Arc<Reconciler>,
}

impl Harness {
    fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(create_delay: Duration) -> Self {
        let journal = Journal::default();
        let provider = FakeProvider::new();
        let factory = RecordingFactory::with_delay(journal.clone(), create_delay);
        let sink = RecordingSink::new(journal.clone());
        let actual = ActualState::shared();
        let reconciler = Arc::new(Reconciler::new(
            provider.clone(),
            factory.clone(),
            sink.clone(),
            actual.clone(),
            INTERVAL,
        ));

        Self {
            journal,
            provider,
            factory,
            sink,
            actual,
            reconciler,
        }
    }

    async fn actual_ids(&self) -> BTreeSet<String> {
        self.actual
            .lock()
            .await
            .ids()
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect()
    }

    async fn version_of(&self, id: &str) -> Option<String> {
        self.actual
            .lock()
            .await
            .version_of(&WorkerId::new(id))
            .map(|v| v.as_str().to_string())
    }
}

fn assert_about(actual: Duration, expected: Duration) {
    let slack = Duration::from_millis(5);
    assert!(
        actual + slack >= expected && actual <= expected + slack,
        "expected about {:?}, got {:?}",
        expected,
        actual
    );
}

fn ids(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn unchanged_snapshot_creates_each_worker_once() {
    let h = Harness::new();
    h.provider.set(snapshot(&[
        ("tenantA", &[("w1", "v1"), ("w2", "v1")]),
        ("tenantB", &[("w3", "v7")]),
    ]));

    for _ in 0..5 {
        h.reconciler.tick().await.expect("tick should succeed");
    }

    assert_eq!(h.journal.count("create w1@v1"), 1);
    assert_eq!(h.journal.count("create w2@v1"), 1);
    assert_eq!(h.journal.count("create w3@v7"), 1);
    assert!(h.journal.entries().iter().all(|e| !e.starts_with("close")));

    let last = h.reconciler.tick().await.expect("tick should succeed");
    assert_eq!(last.unchanged, 3);
    assert!(!last.changed());
}

#[tokio::test]
async fn one_tick_converges_on_new_snapshot() {
    let h = Harness::new();
    h.provider
        .set(snapshot(&[("tenantA", &[("w1", "v1"), ("w2", "v1")])]));
    h.reconciler.tick().await.expect("tick should succeed");
    assert_eq!(h.actual_ids().await, ids(&["w1", "w2"]));

    h.provider.set(snapshot(&[
        ("tenantA", &[("w2", "v1")]),
        ("tenantB", &[("w3", "v1")]),
    ]));
    let report = h.reconciler.tick().await.expect("tick should succeed");

    assert_eq!(h.actual_ids().await, ids(&["w2", "w3"]));
    assert_eq!(report.created, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(h.journal.count("close w1@v1"), 1);
}

#[tokio::test]
async fn removals_happen_after_all_creates() {
    let h = Harness::new();
    h.provider.set(snapshot(&[("tenantA", &[("old", "v1")])]));
    h.reconciler.tick().await.expect("tick should succeed");
    h.journal.clear();

    h.provider
        .set(snapshot(&[("tenantA", &[("a", "v1"), ("b", "v1")])]));
    h.reconciler.tick().await.expect("tick should succeed");

    assert_eq!(
        h.journal.entries(),
        vec!["create a@v1", "create b@v1", "close old@v1"]
    );
}

#[tokio::test]
async fn version_change_closes_old_handle_before_creating_new_one() {
    let h = Harness::new();
    h.provider.set(snapshot(&[("tenantA", &[("w1", "v1")])]));
    h.reconciler.tick().await.expect("tick should succeed");

    h.provider.set(snapshot(&[("tenantA", &[("w1", "v2")])]));
    let report = h.reconciler.tick().await.expect("tick should succeed");

    let close = h.journal.position("close w1@v1").expect("old handle closed");
    let create = h.journal.position("create w1@v2").expect("new handle created");
    assert!(close < create, "close must precede create: {:?}", h.journal.entries());
    assert_eq!(report.replaced, 1);
    assert_eq!(h.version_of("w1").await.as_deref(), Some("v2"));

    let events: Vec<FleetEvent> = h.sink.events().into_iter().map(|e| e.event).collect();
    assert!(events.contains(&FleetEvent::WorkerReplaced {
        tenant_id: TenantId::new("tenantA"),
        worker_id: WorkerId::new("w1"),
        from_version: Version::new("v1"),
        to_version: Version::new("v2"),
    }));
}

#[tokio::test]
async fn close_failure_does_not_block_replacement() {
    let h = Harness::new();
    h.factory.fail_close("w1");
    h.provider.set(snapshot(&[("tenantA", &[("w1", "v1")])]));
    h.reconciler.tick().await.expect("tick should succeed");

    h.provider.set(snapshot(&[("tenantA", &[("w1", "v2")])]));
    let report = h.reconciler.tick().await.expect("tick should succeed");

    assert_eq!(report.replaced, 1);
    assert_eq!(h.version_of("w1").await.as_deref(), Some("v2"));
    assert!(h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e.event, FleetEvent::WorkerCloseFailed { .. })));
}

#[tokio::test]
async fn failing_worker_does_not_stop_others() {
    let h = Harness::new();
    h.factory.fail_create("w1");
    h.provider
        .set(snapshot(&[("tenantA", &[("w1", "v1"), ("w2", "v1")])]));

    let report = h.reconciler.tick().await.expect("tick should succeed");
    assert_eq!(report.failed, 1);
    assert_eq!(report.created, 1);
    assert_eq!(h.actual_ids().await, ids(&["w2"]));

    // The failed id stays desired: retried, never treated as removed
    let report = h.reconciler.tick().await.expect("tick should succeed");
    assert_eq!(h.journal.count("create w1@v1"), 2);
    assert_eq!(report.removed, 0);

    h.factory.heal_create("w1");
    h.reconciler.tick().await.expect("tick should succeed");
    assert_eq!(h.actual_ids().await, ids(&["w1", "w2"]));
}

#[tokio::test]
async fn failing_close_on_removal_does_not_stop_other_removals() {
    let h = Harness::new();
    h.factory.fail_close("w1");
    h.provider
        .set(snapshot(&[("tenantA", &[("w1", "v1"), ("w2", "v1")])]));
    h.reconciler.tick().await.expect("tick should succeed");

    h.provider.set(snapshot(&[]));
    let report = h.reconciler.tick().await.expect("tick should succeed");

    assert_eq!(report.removed, 2);
    assert!(h.actual_ids().await.is_empty());
    assert_eq!(h.journal.count("close w1@v1"), 1);
    assert_eq!(h.journal.count("close w2@v1"), 1);
}

#[tokio::test]
async fn missing_snapshot_skips_tick() {
    let h = Harness::new();
    let report = h.reconciler.tick().await.expect("tick should succeed");

    assert!(report.skipped);
    assert!(h.journal.entries().is_empty());
}

#[tokio::test]
async fn disabled_snapshot_leaves_workers_running() {
    let h = Harness::new();
    h.provider.set(snapshot(&[("tenantA", &[("w1", "v1")])]));
    h.reconciler.tick().await.expect("tick should succeed");

    h.provider.set(fleet_types::DesiredSnapshot::disabled());
    let report = h.reconciler.tick().await.expect("tick should succeed");

    assert!(report.skipped);
    assert_eq!(h.actual_ids().await, ids(&["w1"]));
}

#[tokio::test]
async fn duplicate_ids_keep_last_declaration() {
    let h = Harness::new();
    h.provider.set(snapshot(&[
        ("tenantA", &[("w1", "v1")]),
        ("tenantB", &[("w1", "v2")]),
    ]));

    h.reconciler.tick().await.expect("tick should succeed");

    assert_eq!(h.journal.entries(), vec!["create w1@v2"]);
    assert_eq!(
        h.actual.lock().await.tenant_of(&WorkerId::new("w1")),
        Some(&TenantId::new("tenantB"))
    );
}

#[tokio::test]
async fn tenant_move_keeps_worker_and_updates_owner() {
    let h = Harness::new();
    h.provider.set(snapshot(&[("tenantA", &[("w1", "v1")])]));
    h.reconciler.tick().await.expect("tick should succeed");

    h.provider.set(snapshot(&[("tenantB", &[("w1", "v1")])]));
    let report = h.reconciler.tick().await.expect("tick should succeed");

    assert_eq!(report.unchanged, 1);
    assert_eq!(h.journal.entries(), vec!["create w1@v1"]);
    let summaries = h.actual.lock().await.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].tenant_id.as_str(), "tenantB");
}

#[tokio::test]
async fn provider_error_fails_the_tick() {
    let h = Harness::new();
    h.provider.break_down();
    assert!(h.reconciler.tick().await.is_err());
}

#[tokio::test]
async fn loop_failure_requests_shutdown() {
    let h = Harness::new();
    h.provider.break_down();

    let (trigger, mut requests) = shutdown::channel();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let watcher = spawn_reconciler(h.reconciler.clone(), stop_rx, trigger.clone());

    let reason = requests.recv().await.expect("shutdown requested");
    assert!(matches!(reason, ShutdownReason::LoopFailure(_)));
    watcher.await.expect("watcher finished");
    assert!(trigger.has_fired());
}

#[tokio::test]
async fn create_change_remove_scenario() {
    let h = Harness::new();

    h.provider.set(snapshot(&[("tenantA", &[("w1", "v1")])]));
    h.reconciler.tick().await.expect("tick should succeed");
    assert_eq!(h.version_of("w1").await.as_deref(), Some("v1"));

    h.provider.set(snapshot(&[("tenantA", &[("w1", "v2")])]));
    h.reconciler.tick().await.expect("tick should succeed");
    assert_eq!(h.version_of("w1").await.as_deref(), Some("v2"));

    h.provider.set(snapshot(&[]));
    h.reconciler.tick().await.expect("tick should succeed");
    assert!(h.actual_ids().await.is_empty());

    assert_eq!(
        h.journal.entries(),
        vec!["create w1@v1", "close w1@v1", "create w1@v2", "close w1@v2"]
    );
}

#[tokio::test(start_paused = true)]
async fn loop_waits_only_the_remainder_of_the_interval() {
    let h = Harness::with_delay(Duration::from_millis(1500));
    h.provider.set(snapshot(&[("tenantA", &[("w1", "v1")])]));

    let (stop_tx, stop_rx) = watch::channel(false);
    let reconciler = h.reconciler.clone();
    let task = tokio::spawn(async move { reconciler.run(stop_rx).await });

    tokio::time::sleep(Duration::from_millis(4500)).await;
    stop_tx.send_replace(true);
    task.await
        .expect("loop task finished")
        .expect("loop exited cleanly");

    let reads = h.provider.reads();
    assert!(reads.len() >= 3, "expected at least three ticks, got {}", reads.len());
    // First tick spent 1.5s creating w1; the next one still starts on the 2s grid
    assert_about(reads[1] - reads[0], INTERVAL);
    assert_about(reads[2] - reads[1], INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn slow_tick_is_followed_immediately() {
    let h = Harness::with_delay(Duration::from_secs(3));
    h.provider.set(snapshot(&[("tenantA", &[("w1", "v1")])]));

    let (stop_tx, stop_rx) = watch::channel(false);
    let reconciler = h.reconciler.clone();
    let task = tokio::spawn(async move { reconciler.run(stop_rx).await });

    tokio::time::sleep(Duration::from_millis(3500)).await;
    stop_tx.send_replace(true);
    task.await
        .expect("loop task finished")
        .expect("loop exited cleanly");

    let reads = h.provider.reads();
    assert!(reads.len() >= 2);
    assert_about(reads[1] - reads[0], Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn worker_created_after_drain_is_closed_immediately() {
    let h = Harness::with_delay(Duration::from_secs(1));
    h.provider.set(snapshot(&[(
        "tenantA",
        &[("w1", "v1"), ("w2", "v1"), ("w3", "v1")],
    )]));

    let reconciler = h.reconciler.clone();
    let tick = tokio::spawn(async move { reconciler.tick().await });

    // Mid-way through creating w2; only w1 is in the table
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let (stop_tx, _stop_rx) = watch::channel(false);
    let http = ListenerHandle::new("http");
    http.mark_started();
    let coordinator = ShutdownCoordinator::new(stop_tx, h.actual.clone(), http, Duration::ZERO);
    coordinator
        .drain(ShutdownReason::Signal("SIGTERM".to_string()))
        .await;

    let report = tick
        .await
        .expect("tick task finished")
        .expect("tick should succeed");

    assert_eq!(report.created, 1);
    assert!(h.actual.lock().await.is_empty());
    assert_eq!(
        h.journal.entries(),
        vec![
            "create w1@v1",
            "close w1@v1",
            "create w2@v1",
            "close w2@v1",
            "create w3@v1",
            "close w3@v1",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn hung_create_does_not_block_shutdown() {
    let h = Harness::new();
    h.factory.hang_create("w2");
    h.provider.set(snapshot(&[("tenantA", &[("w1", "v1"), ("w2", "v1")])]));

    let reconciler = h.reconciler.clone();
    let tick = tokio::spawn(async move { reconciler.tick().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.journal.entries(), vec!["create w1@v1", "hang w2@v1"]);

    let (stop_tx, stop_rx) = watch::channel(false);
    let http = ListenerHandle::new("http");
    http.mark_started();
    let metrics = ListenerHandle::new("metrics");
    let coordinator = ShutdownCoordinator::new(stop_tx, h.actual.clone(), http.clone(), Duration::from_secs(5))
        .with_metrics_listener(metrics.clone())
        .with_sink(h.sink.clone());

    let status = tokio::time::timeout(
        Duration::from_secs(60),
        coordinator.drain(ShutdownReason::Signal("SIGTERM".to_string())),
    )
    .await
    .expect("drain finished while a create hangs");

    assert_eq!(status.code(), 0);
    assert!(*stop_rx.borrow());
    assert!(http.is_closed());
    assert!(metrics.is_closed());
    assert_eq!(
        h.journal.entries(),
        vec!["create w1@v1", "hang w2@v1", "close w1@v1", "sink close"]
    );
    assert!(!tick.is_finished());
    tick.abort();
}

#[tokio::test]
async fn worker_listing_is_not_blocked_by_a_hung_create() {
    let h = Harness::new();
    h.factory.hang_create("w2");
    h.provider.set(snapshot(&[("tenantA", &[("w1", "v1"), ("w2", "v1")])]));

    let reconciler = h.reconciler.clone();
    let tick = tokio::spawn(async move { reconciler.tick().await });
    while h.journal.position("hang w2@v1").is_none() {
        tokio::task::yield_now().await;
    }

    let listed = tokio::time::timeout(Duration::from_secs(5), h.actual_ids())
        .await
        .expect("table lock is free during create");
    assert_eq!(listed, ids(&["w1"]));
    tick.abort();
}

#[tokio::test]
async fn registered_handles_are_owned_by_the_table() {
    let journal = Journal::default();
    let actual = ActualState::shared();
    actual
        .lock()
        .await
        .register(
            TenantId::new("tenantA"),
            Version::new("v1"),
            FakeHandle::boxed("w1", "v1", &journal),
        )
        .map_err(|_| "table sealed")
        .expect("register should succeed");

    let entry = actual
        .lock()
        .await
        .remove(&WorkerId::new("w1"))
        .expect("entry present");
    entry.handle.close().await.expect("close should succeed");
    assert_eq!(journal.entries(), vec!["close w1@v1"]);
}
