//! Fleet Daemon - keeps profile builder workers converged on the desired state
//!
//! The daemon provides:
//! - Reconciliation loop over a polled workspace document
//! - Ordered, single-shot shutdown drain
//! - Control surface for health and diagnostics
//! - Prometheus metrics on a separate listener

use clap::Parser;
use fleet_daemon::config::{ConfigOverrides, DaemonConfig, EventSinkKind};
use fleet_daemon::error::{DaemonError, DaemonResult};
use fleet_daemon::{ExitStatus, Server};
use fleet_observability::{init_tracing, TracingConfig};
use std::path::PathBuf;

/// Fleet Daemon CLI
#[derive(Parser)]
#[command(name = "fleetd")]
#[command(about = "Fleet Daemon - profile builder fleet manager", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Host both listeners bind to
    #[arg(long, env = "FLEET_BIND_HOST")]
    bind_host: Option<String>,

    /// Control surface port
    #[arg(long, env = "FLEET_HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port
    #[arg(long, env = "FLEET_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Reconciliation interval in seconds
    #[arg(long, env = "FLEET_POLL_INTERVAL_SECS")]
    poll_interval_secs: Option<u64>,

    /// Grace delay before exit, in seconds
    #[arg(long, env = "FLEET_SHUTDOWN_DELAY_SECS")]
    shutdown_delay_secs: Option<u64>,

    /// Hex SHA-256 digests of accepted bearer tokens
    #[arg(long, env = "FLEET_AUTH_TOKEN_HASHES", value_delimiter = ',', conflicts_with = "auth_tokens")]
    auth_token_hashes: Option<Vec<String>>,

    /// Accepted bearer tokens
    #[arg(long, env = "FLEET_AUTH_TOKENS", value_delimiter = ',', hide_env_values = true)]
    auth_tokens: Option<Vec<String>>,

    /// Enable JSON logging
    #[arg(long, env = "FLEET_LOG_JSON")]
    json: bool,

    /// Log level
    #[arg(long, env = "FLEET_LOG_LEVEL")]
    log_level: Option<String>,

    /// Event sink backend
    #[arg(long, env = "FLEET_EVENT_SINK", value_enum)]
    event_sink: Option<EventSinkKind>,

    /// File written by the jsonl event sink
    #[arg(long, env = "FLEET_EVENT_LOG_PATH")]
    event_log_path: Option<PathBuf>,

    /// Desired-state document
    #[arg(long, env = "FLEET_WORKSPACES_PATH")]
    workspaces_path: Option<PathBuf>,

    /// Default worker parameters document
    #[arg(long, env = "FLEET_SETTINGS_PATH")]
    settings_path: Option<PathBuf>,

    /// Store polling interval in seconds
    #[arg(long, env = "FLEET_STORE_REFRESH_SECS")]
    store_refresh_secs: Option<u64>,

    /// PostgreSQL URL for the connection pool
    #[arg(long, env = "FLEET_DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind_host: self.bind_host.clone(),
            http_port: self.http_port,
            metrics_port: self.metrics_port,
            poll_interval_secs: self.poll_interval_secs,
            grace_delay_secs: self.shutdown_delay_secs,
            token_hashes: self.auth_token_hashes.clone(),
            tokens: self.auth_tokens.clone(),
            log_json: self.json.then_some(true),
            log_level: self.log_level.clone(),
            event_sink: self.event_sink,
            event_log_path: self.event_log_path.clone(),
            workspaces_path: self.workspaces_path.clone(),
            settings_path: self.settings_path.clone(),
            store_refresh_secs: self.store_refresh_secs,
            database_url: self.database_url.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(status) => status.code(),
        Err(e) => {
            if tracing::dispatcher::has_been_set() {
                tracing::error!(error = %e, "Fleet daemon failed");
            } else {
                eprintln!("fleetd: {}", e);
            }
            1
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> DaemonResult<ExitStatus> {
    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args and flat environment variables
    config.apply(cli.overrides());

    // Initialize tracing
    init_tracing(
        &TracingConfig::new("fleetd")
            .with_json_format(config.logging.json)
            .with_log_level(config.logging.level.clone()),
    )?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        http_port = config.server.http_port,
        metrics_port = config.server.metrics_port,
        poll_interval_secs = config.scheduler.poll_interval_secs,
        workspaces = %config.stores.workspaces_path.display(),
        "Starting fleet daemon"
    );

    let server = Server::new(config)?;
    server.run().await
}
