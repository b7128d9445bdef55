//! Application state for API handlers

use crate::api::auth::AuthGate;
use crate::scheduler::SharedActualState;
use crate::store::StoreLifecycle;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Live workers
    pub actual: SharedActualState,

    /// Upstream stores reported on `/health`
    pub stores: Vec<Arc<dyn StoreLifecycle>>,

    /// Token gate applied to every route outside the bypass list
    pub auth: Arc<AuthGate>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(actual: SharedActualState, auth: Arc<AuthGate>) -> Self {
        Self {
            actual,
            stores: Vec::new(),
            auth,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StoreLifecycle>) -> Self {
        self.stores.push(store);
        self
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let duration = chrono::Utc::now() - self.started_at;
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
