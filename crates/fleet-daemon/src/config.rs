//! Configuration for fleet-daemon
//!
//! Layers, lowest first: built-in defaults, an optional config file,
//! `FLEET__`-prefixed nested environment variables (for example
//! `FLEET__SCHEDULER__POLL_INTERVAL_SECS`), then the flat deployment
//! variables and CLI flags collected in [`ConfigOverrides`].

use crate::error::DaemonError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconciliation loop configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Shutdown configuration
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Control surface authentication
    #[serde(default)]
    pub auth: AuthConfig,

    /// Upstream store configuration
    #[serde(default)]
    pub stores: StoresConfig,

    /// Event sink configuration
    #[serde(default)]
    pub events: EventsConfig,

    /// Connection pool configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host both listeners bind to
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Control surface port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            http_port: default_http_port(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl ServerConfig {
    pub fn http_addr(&self) -> Result<SocketAddr, DaemonError> {
        self.addr(self.http_port)
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr, DaemonError> {
        self.addr(self.metrics_port)
    }

    fn addr(&self, port: u16) -> Result<SocketAddr, DaemonError> {
        let host = if self.bind_host.contains(':') && !self.bind_host.starts_with('[') {
            format!("[{}]", self.bind_host)
        } else {
            self.bind_host.clone()
        };
        format!("{}:{}", host, port)
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid bind host {}: {}", self.bind_host, e)))
    }
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Reconciliation interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Shutdown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Wait after the drain before exiting, in seconds
    #[serde(default = "default_grace_delay")]
    pub grace_delay_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_delay_secs: default_grace_delay(),
        }
    }
}

impl ShutdownConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_secs(self.grace_delay_secs)
    }
}

/// Bearer tokens accepted by the control surface.
///
/// At most one of the two lists may be set; with neither the surface is open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Hex-encoded SHA-256 digests of accepted tokens
    #[serde(default)]
    pub token_hashes: Vec<String>,

    /// Accepted tokens in the clear
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// Upstream store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoresConfig {
    /// Desired-state document
    #[serde(default = "default_workspaces_path")]
    pub workspaces_path: PathBuf,

    /// Default worker parameters, merged into every worker's own
    #[serde(default)]
    pub settings_path: Option<PathBuf>,

    /// Polling interval in seconds
    #[serde(default = "default_store_refresh")]
    pub refresh_secs: u64,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            workspaces_path: default_workspaces_path(),
            settings_path: None,
            refresh_secs: default_store_refresh(),
        }
    }
}

impl StoresConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

/// Event sink backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EventSinkKind {
    /// Drop every event
    #[default]
    Noop,

    /// Append events to a JSON-lines file
    Jsonl,
}

/// Event sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default)]
    pub sink: EventSinkKind,

    /// File used by the `jsonl` sink
    #[serde(default = "default_event_log_path")]
    pub path: PathBuf,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            sink: EventSinkKind::Noop,
            path: default_event_log_path(),
        }
    }
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; no pool is created without one
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum connections in pool
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_pool_size(),
            connect_timeout_secs: default_connection_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_poll_interval() -> u64 {
    2
}

fn default_grace_delay() -> u64 {
    5
}

fn default_workspaces_path() -> PathBuf {
    PathBuf::from("workspaces.json")
}

fn default_store_refresh() -> u64 {
    5
}

fn default_event_log_path() -> PathBuf {
    PathBuf::from("fleet-events.jsonl")
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Values from flat environment variables and CLI flags
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind_host: Option<String>,
    pub http_port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub poll_interval_secs: Option<u64>,
    pub grace_delay_secs: Option<u64>,
    pub token_hashes: Option<Vec<String>>,
    pub tokens: Option<Vec<String>>,
    pub log_json: Option<bool>,
    pub log_level: Option<String>,
    pub event_sink: Option<EventSinkKind>,
    pub event_log_path: Option<PathBuf>,
    pub workspaces_path: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
    pub store_refresh_secs: Option<u64>,
    pub database_url: Option<String>,
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        // Add nested environment variables with FLEET__ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("FLEET")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("auth.token_hashes")
                .with_list_parse_key("auth.tokens")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Apply flat overrides on top of the layered configuration
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.bind_host {
            self.server.bind_host = host;
        }
        if let Some(port) = overrides.http_port {
            self.server.http_port = port;
        }
        if let Some(port) = overrides.metrics_port {
            self.server.metrics_port = port;
        }
        if let Some(secs) = overrides.poll_interval_secs {
            self.scheduler.poll_interval_secs = secs;
        }
        if let Some(secs) = overrides.grace_delay_secs {
            self.shutdown.grace_delay_secs = secs;
        }
        if let Some(hashes) = overrides.token_hashes {
            self.auth.token_hashes = hashes;
        }
        if let Some(tokens) = overrides.tokens {
            self.auth.tokens = tokens;
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = json;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(sink) = overrides.event_sink {
            self.events.sink = sink;
        }
        if let Some(path) = overrides.event_log_path {
            self.events.path = path;
        }
        if let Some(path) = overrides.workspaces_path {
            self.stores.workspaces_path = path;
        }
        if let Some(path) = overrides.settings_path {
            self.stores.settings_path = Some(path);
        }
        if let Some(secs) = overrides.store_refresh_secs {
            self.stores.refresh_secs = secs;
        }
        if let Some(url) = overrides.database_url {
            self.database.url = Some(url);
        }
    }

    /// Reject combinations the daemon cannot run with
    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.scheduler.poll_interval_secs == 0 {
            return Err(DaemonError::Config(
                "Poll interval must be at least one second".to_string(),
            ));
        }
        if self.stores.refresh_secs == 0 {
            return Err(DaemonError::Config(
                "Store refresh interval must be at least one second".to_string(),
            ));
        }
        if !self.auth.token_hashes.is_empty() && !self.auth.tokens.is_empty() {
            return Err(DaemonError::Config(
                "Hashed and raw auth tokens are mutually exclusive".to_string(),
            ));
        }
        if self.server.http_port != 0 && self.server.http_port == self.server.metrics_port {
            return Err(DaemonError::Config(format!(
                "Control and metrics listeners cannot share port {}",
                self.server.http_port
            )));
        }
        self.server.http_addr()?;
        Ok(())
    }
}
