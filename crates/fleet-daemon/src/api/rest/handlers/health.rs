//! Health and version handlers

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use fleet_types::{StoreState, StoreStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// Either a known flag or the literal `"loading"`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EnabledState {
    Known(bool),
    Loading(&'static str),
}

/// Health of one upstream store
#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub enabled: EnabledState,
    pub status: StoreState,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<StoreStatus> for StoreHealth {
    fn from(status: StoreStatus) -> Self {
        let enabled = if status.is_loading() {
            EnabledState::Loading("loading")
        } else {
            EnabledState::Known(status.enabled)
        };

        Self {
            enabled,
            status: status.state,
            last_refresh: status.last_refresh,
            last_modified: status.last_modified,
            last_error: status.last_error,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: &'static str,
    pub version: String,
    pub uptime: String,
    pub stores: BTreeMap<String, StoreHealth>,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    let statuses: Vec<StoreStatus> = state.stores.iter().map(|store| store.status()).collect();

    let status = if statuses.iter().any(StoreStatus::is_loading) {
        "loading"
    } else if statuses
        .iter()
        .any(|s| !s.enabled || s.state == StoreState::Error)
    {
        "degraded"
    } else {
        "ok"
    };

    let stores = statuses
        .into_iter()
        .map(|s| (s.name.clone(), StoreHealth::from(s)))
        .collect();

    Json(HealthCheckResponse {
        status,
        version: state.version.clone(),
        uptime: state.uptime(),
        stores,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub name: &'static str,
    pub version: String,
    pub started_at: DateTime<Utc>,
}

/// Version endpoint
pub async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: state.version.clone(),
        started_at: state.started_at,
    })
}
