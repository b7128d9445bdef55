//! Server setup and lifecycle management

use crate::api::{create_router, AppState, AuthGate};
use crate::config::{DaemonConfig, DatabaseConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::pool::ConnectionPool;
use crate::scheduler::{spawn_reconciler, ActualState, Reconciler};
use crate::shutdown::{self, ExitStatus, ListenerHandle, ShutdownCoordinator, ShutdownReason, ShutdownTrigger};
use crate::signals::forward_signals;
use crate::sink::create_sink;
use crate::store::{FileStore, StoreLifecycle};
use crate::worker::LocalWorkerFactory;
use fleet_observability::{metrics_router, MetricsRegistry};
use fleet_types::DesiredSnapshot;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Fleet daemon server
pub struct Server {
    config: DaemonConfig,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run until shutdown and report the exit status.
    ///
    /// Returns an error only for startup failures that happen before the
    /// reconciliation loop is started, including a disabled upstream store.
    pub async fn run(self) -> DaemonResult<ExitStatus> {
        let config = self.config;
        let http_addr = config.server.http_addr()?;
        let metrics_addr = config.server.metrics_addr()?;

        let auth = Arc::new(AuthGate::from_config(&config.auth)?);
        if auth.is_open() {
            tracing::warn!("No auth tokens configured, control surface is open to every caller");
        } else {
            tracing::info!(mode = auth.mode(), "Control surface authentication enabled");
        }

        let metrics = MetricsRegistry::with_namespace("fleet");

        // Upstream stores
        let refresh = config.stores.refresh_interval();
        let workspaces = FileStore::<DesiredSnapshot>::new(
            "workspaces",
            config.stores.workspaces_path.clone(),
            refresh,
        );
        let settings = config
            .stores
            .settings_path
            .clone()
            .map(|path| FileStore::<serde_json::Value>::new("settings", path, refresh));

        workspaces.spawn();
        let mut stores: Vec<Arc<dyn StoreLifecycle>> = vec![workspaces.clone()];
        if let Some(settings) = &settings {
            settings.spawn();
            stores.push(settings.clone());
        }

        if let Err(e) = check_stores(&stores).await {
            for store in &stores {
                store.stop();
            }
            return Err(e);
        }

        // Collaborators
        let sink = create_sink(&config.events).await?;
        tracing::info!(sink = sink.name(), "Event sink ready");
        let pool = connect_pool(&config.database)?;

        let mut factory = LocalWorkerFactory::new();
        if let Some(settings) = &settings {
            factory = factory.with_defaults(settings.clone());
        }

        let actual = ActualState::shared();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (trigger, requests) = shutdown::channel();

        // Listeners
        let http = ListenerHandle::new("http");
        let mut state = AppState::new(actual.clone(), auth);
        for store in &stores {
            state = state.with_store(store.clone());
        }
        serve_control(http_addr, create_router(state), &http, &trigger).await;

        let metrics_listener = ListenerHandle::new("metrics");
        serve_metrics(metrics_addr, metrics_router(metrics.registry()), &metrics_listener).await;

        tokio::spawn(forward_signals(trigger.clone()));

        // Reconciliation
        if trigger.has_fired() {
            tracing::warn!("Shutdown requested during startup, reconciliation loop not started");
        } else {
            let reconciler = Reconciler::new(
                workspaces.clone(),
                Arc::new(factory),
                sink.clone(),
                actual.clone(),
                config.scheduler.poll_interval(),
            )
            .with_metrics(metrics.fleet());
            spawn_reconciler(Arc::new(reconciler), stop_rx, trigger.clone());
        }

        let mut coordinator = ShutdownCoordinator::new(
            stop_tx,
            actual,
            http,
            config.shutdown.grace_delay(),
        )
        .with_sink(sink)
        .with_metrics_listener(metrics_listener);
        for store in stores {
            coordinator = coordinator.with_store(store);
        }
        if let Some(pool) = pool {
            coordinator = coordinator.with_pool(pool);
        }

        let status = coordinator.run(requests).await;
        tracing::info!(exit_code = status.code(), "Fleet daemon stopped");
        Ok(status)
    }
}

/// Wait for every store's first load and refuse to start if one is disabled
pub async fn check_stores(stores: &[Arc<dyn StoreLifecycle>]) -> DaemonResult<()> {
    for store in stores {
        store.ready().await;
        let status = store.status();

        if !status.enabled {
            tracing::error!(
                subsystem = "store",
                store = store.name(),
                state = %status.state,
                error = status.last_error.as_deref().unwrap_or("disabled by document"),
                "Required store is disabled"
            );
            return Err(DaemonError::StoreDisabled(store.name().to_string()));
        }

        tracing::info!(
            subsystem = "store",
            store = store.name(),
            state = %status.state,
            "Store ready"
        );
    }
    Ok(())
}

async fn serve_control(
    addr: SocketAddr,
    app: axum::Router,
    handle: &Arc<ListenerHandle>,
    trigger: &ShutdownTrigger,
) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(subsystem = "http", addr = %addr, error = %e, "Failed to bind control surface");
            trigger.fire(ShutdownReason::ListenerFailure(format!("bind {}: {}", addr, e)));
            return;
        }
    };

    handle.mark_started();
    tracing::info!(subsystem = "http", addr = %addr, "Control surface listening");

    let closed = handle.closed();
    let trigger = trigger.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(closed).await {
            tracing::error!(subsystem = "http", error = %e, "Control surface failed");
            trigger.fire(ShutdownReason::ListenerFailure(e.to_string()));
        }
    });
}

/// The metrics listener is optional; failures are logged only
async fn serve_metrics(addr: SocketAddr, app: axum::Router, handle: &Arc<ListenerHandle>) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::warn!(subsystem = "metrics", addr = %addr, error = %e, "Failed to bind metrics listener, continuing without metrics");
            return;
        }
    };

    handle.mark_started();
    tracing::info!(subsystem = "metrics", addr = %addr, "Metrics listening");

    let closed = handle.closed();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(closed).await {
            tracing::warn!(subsystem = "metrics", error = %e, "Metrics listener failed");
        }
    });
}

#[cfg(feature = "postgres")]
fn connect_pool(config: &DatabaseConfig) -> DaemonResult<Option<Arc<dyn ConnectionPool>>> {
    let Some(url) = config.url.as_deref() else {
        return Ok(None);
    };
    let pool = crate::pool::PgConnectionPool::connect_lazy(config, url)?;
    tracing::info!(subsystem = "pool", max_connections = config.max_connections, "Connection pool configured");
    Ok(Some(Arc::new(pool)))
}

#[cfg(not(feature = "postgres"))]
fn connect_pool(config: &DatabaseConfig) -> DaemonResult<Option<Arc<dyn ConnectionPool>>> {
    match config.url {
        None => Ok(None),
        Some(_) => Err(DaemonError::Config(
            "A database URL is configured but fleet-daemon was built without the postgres feature"
                .to_string(),
        )),
    }
}
