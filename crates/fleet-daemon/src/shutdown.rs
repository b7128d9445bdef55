//! Shutdown coordination
//!
//! Every shutdown request, whether from an OS signal, a failed reconciliation
//! loop or a listener that could not start, goes through one single-fire
//! [`ShutdownTrigger`]. A single [`ShutdownCoordinator`] consumes the first
//! request and runs the drain sequence:
//!
//! 1. raise the stop flag
//! 2. close every live worker, one at a time
//! 3. close the event sink
//! 4. close the control listener
//! 5. stop the upstream stores
//! 6. close the connection pool
//! 7. wait the grace delay, close the metrics listener and report the exit status
//!
//! Failures in steps 2 to 6 are logged and never stop the sequence.

use crate::pool::ConnectionPool;
use crate::scheduler::reconciler::panic_message;
use crate::scheduler::SharedActualState;
use crate::sink::{record, EventSink};
use crate::store::StoreLifecycle;
use fleet_types::{EventSource, FleetEvent};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Why shutdown was requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// OS termination signal
    Signal(String),

    /// The reconciliation loop failed as a whole
    LoopFailure(String),

    /// The control surface could not be served
    ListenerFailure(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "signal {}", name),
            ShutdownReason::LoopFailure(msg) => write!(f, "reconciliation loop failed: {}", msg),
            ShutdownReason::ListenerFailure(msg) => write!(f, "listener failed: {}", msg),
        }
    }
}

/// Process exit status decided by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The control surface was serving before shutdown began
    Clean,

    /// Shutdown without ever reaching a healthy listening state
    NeverHealthy,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::NeverHealthy => 1,
        }
    }
}

/// Create a connected trigger / request pair
pub fn channel() -> (ShutdownTrigger, ShutdownRequests) {
    let (tx, rx) = mpsc::unbounded_channel();
    let trigger = ShutdownTrigger {
        tx,
        fired: Arc::new(AtomicBool::new(false)),
    };
    (trigger, ShutdownRequests { rx })
}

/// Cloneable single-fire shutdown sender
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: mpsc::UnboundedSender<ShutdownReason>,
    fired: Arc<AtomicBool>,
}

impl ShutdownTrigger {
    /// Request shutdown. Returns `false` if shutdown was already requested.
    pub fn fire(&self, reason: ShutdownReason) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            tracing::info!(reason = %reason, "Shutdown already in progress, ignoring request");
            return false;
        }

        tracing::warn!(reason = %reason, "Shutdown requested");
        let _ = self.tx.send(reason);
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Receiving side of [`channel`]
pub struct ShutdownRequests {
    rx: mpsc::UnboundedReceiver<ShutdownReason>,
}

impl ShutdownRequests {
    /// Wait for the first request; `None` once every trigger is gone
    pub async fn recv(&mut self) -> Option<ShutdownReason> {
        self.rx.recv().await
    }
}

/// Lifecycle flags for a served listener
pub struct ListenerHandle {
    name: &'static str,
    started: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl ListenerHandle {
    pub fn new(name: &'static str) -> Arc<Self> {
        let (close_tx, _) = watch::channel(false);
        Arc::new(Self {
            name,
            started: AtomicBool::new(false),
            close_tx,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record that the listener is bound and serving
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Stop accepting connections
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Resolves once [`ListenerHandle::close`] has been called
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut close_rx = self.close_tx.subscribe();
        async move {
            let _ = close_rx.wait_for(|closed| *closed).await;
        }
    }
}

/// Runs the drain sequence exactly once
pub struct ShutdownCoordinator {
    stop_tx: watch::Sender<bool>,
    actual: SharedActualState,
    http: Arc<ListenerHandle>,
    grace_delay: Duration,
    sink: Option<Arc<dyn EventSink>>,
    stores: Vec<Arc<dyn StoreLifecycle>>,
    pool: Option<Arc<dyn ConnectionPool>>,
    metrics_listener: Option<Arc<ListenerHandle>>,
    drained: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(
        stop_tx: watch::Sender<bool>,
        actual: SharedActualState,
        http: Arc<ListenerHandle>,
        grace_delay: Duration,
    ) -> Self {
        Self {
            stop_tx,
            actual,
            http,
            grace_delay,
            sink: None,
            stores: Vec::new(),
            pool: None,
            metrics_listener: None,
            drained: AtomicBool::new(false),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Stores are stopped in registration order
    pub fn with_store(mut self, store: Arc<dyn StoreLifecycle>) -> Self {
        self.stores.push(store);
        self
    }

    pub fn with_pool(mut self, pool: Arc<dyn ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_metrics_listener(mut self, listener: Arc<ListenerHandle>) -> Self {
        self.metrics_listener = Some(listener);
        self
    }

    /// Wait for the first shutdown request and drain
    pub async fn run(&self, mut requests: ShutdownRequests) -> ExitStatus {
        let reason = requests.recv().await.unwrap_or_else(|| {
            ShutdownReason::LoopFailure("shutdown channel closed".to_string())
        });
        self.drain(reason).await
    }

    /// Run the drain sequence; later calls only report the exit status
    pub async fn drain(&self, reason: ShutdownReason) -> ExitStatus {
        let healthy = self.http.has_started();
        let status = if healthy {
            ExitStatus::Clean
        } else {
            ExitStatus::NeverHealthy
        };

        if self.drained.swap(true, Ordering::SeqCst) {
            tracing::info!(reason = %reason, "Drain already performed");
            return status;
        }

        tracing::info!(reason = %reason, healthy, "Shutting down");

        // 1. Stop flag
        self.stop_tx.send_replace(true);
        if let Some(sink) = &self.sink {
            record(
                sink.as_ref(),
                FleetEvent::ShutdownStarted {
                    reason: reason.to_string(),
                },
                EventSource::Shutdown,
            );
        }

        // 2. Workers
        self.close_workers().await;

        // 3. Event sink
        if let Some(sink) = &self.sink {
            match sink.close().await {
                Ok(()) => tracing::debug!(subsystem = "sink", sink = sink.name(), "Event sink closed"),
                Err(e) => tracing::error!(
                    subsystem = "sink",
                    sink = sink.name(),
                    error = %e,
                    "Failed to close event sink"
                ),
            }
        }

        // 4. Control listener
        self.http.close();
        tracing::debug!(subsystem = "http", listener = self.http.name(), "Listener closed");

        // 5. Stores
        for store in &self.stores {
            store.stop();
            tracing::debug!(subsystem = "store", store = store.name(), "Store stopped");
        }

        // 6. Connection pool
        if let Some(pool) = &self.pool {
            let closed = AssertUnwindSafe(pool.close()).catch_unwind().await;
            match closed {
                Ok(()) => tracing::debug!(subsystem = "pool", pool = pool.name(), "Connection pool closed"),
                Err(panic) => tracing::error!(
                    subsystem = "pool",
                    pool = pool.name(),
                    panic = %panic_message(panic.as_ref()),
                    "Connection pool close panicked"
                ),
            }
        }

        // 7. Grace delay
        tracing::info!(
            grace_delay_ms = self.grace_delay.as_millis() as u64,
            exit_code = status.code(),
            "Drain complete, waiting for telemetry to flush"
        );
        tokio::time::sleep(self.grace_delay).await;
        if let Some(listener) = &self.metrics_listener {
            listener.close();
        }

        status
    }

    async fn close_workers(&self) {
        let entries = self.actual.lock().await.seal_and_drain();
        tracing::info!(count = entries.len(), "Closing workers");

        for entry in entries {
            let closed = AssertUnwindSafe(entry.handle.close()).catch_unwind().await;
            match closed {
                Ok(Ok(())) => tracing::debug!(
                    worker_id = %entry.worker_id(),
                    version = %entry.version,
                    "Worker closed"
                ),
                Ok(Err(e)) => tracing::error!(
                    worker_id = %entry.worker_id(),
                    version = %entry.version,
                    error = %e,
                    "Failed to close worker during shutdown"
                ),
                Err(panic) => tracing::error!(
                    worker_id = %entry.worker_id(),
                    version = %entry.version,
                    panic = %panic_message(panic.as_ref()),
                    "Worker close panicked during shutdown"
                ),
            }
        }
    }
}
