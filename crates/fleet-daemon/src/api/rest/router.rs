//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::api::auth::require_auth;
use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

/// Create the control surface router.
///
/// The token gate wraps every route and the fallback; `/health` and
/// `/version` are let through by the gate itself.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/version", get(handlers::version))
        .route("/wtfheap", get(handlers::heap_diagnostics))
        .route("/workers", get(handlers::list_workers))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
