//! Worker listing handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::scheduler::WorkerSummary;
use axum::{extract::State, http::Uri, Json};
use serde::Serialize;

/// Live workers response
#[derive(Debug, Serialize)]
pub struct WorkersResponse {
    pub count: usize,
    pub workers: Vec<WorkerSummary>,
}

/// List the actual state
pub async fn list_workers(State(state): State<AppState>) -> Json<WorkersResponse> {
    let workers = state.actual.lock().await.summaries();
    Json(WorkersResponse {
        count: workers.len(),
        workers,
    })
}

/// Fallback for unknown routes
pub async fn not_found(uri: Uri) -> ApiResult<()> {
    Err(ApiError::NotFound(uri.path().to_string()))
}
