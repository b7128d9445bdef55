//! Status reported by upstream configuration stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Load state of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreState {
    /// No load attempt has finished yet
    Loading,
    /// Last refresh succeeded
    Ready,
    /// Last refresh failed; a previously cached value may still be served
    Error,
    /// Background refresh has been stopped
    Stopped,
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreState::Loading => "loading",
            StoreState::Ready => "ready",
            StoreState::Error => "error",
            StoreState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Snapshot of a store's health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStatus {
    pub name: String,
    pub enabled: bool,
    pub state: StoreState,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl StoreStatus {
    /// Status of a store that has not finished its first load
    pub fn loading(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            state: StoreState::Loading,
            last_refresh: None,
            last_modified: None,
            last_error: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.state == StoreState::Loading
    }
}
