//! Metrics exporter for Prometheus scraping

use crate::error::{ObservabilityError, Result};
use prometheus::{Encoder, Registry, TextEncoder};

/// Export metrics in Prometheus text format
pub fn export_metrics(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| ObservabilityError::Metrics(e.to_string()))
}

/// HTTP handler for metrics endpoint (requires "http" feature)
#[cfg(feature = "http")]
pub mod http {
    use axum::{
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    use prometheus::Registry;
    use std::sync::Arc;

    /// Metrics endpoint state
    #[derive(Clone)]
    pub struct MetricsState {
        pub registry: Arc<Registry>,
    }

    impl MetricsState {
        pub fn new(registry: Arc<Registry>) -> Self {
            Self { registry }
        }
    }

    /// Handler for GET /metrics
    pub async fn metrics_handler(State(state): State<MetricsState>) -> Response {
        match super::export_metrics(&state.registry) {
            Ok(metrics) => (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                metrics,
            )
                .into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to export metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        }
    }

    /// Create an axum router for metrics
    pub fn metrics_router(registry: Arc<Registry>) -> axum::Router {
        use axum::routing::get;

        axum::Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(MetricsState::new(registry))
    }
}
