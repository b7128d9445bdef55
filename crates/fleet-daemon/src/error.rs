//! Error types for fleet-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleet_observability::ObservabilityError;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// A required upstream store reported itself disabled at startup
    #[error("Store disabled: {0}")]
    StoreDisabled(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Event sink error
    #[error("Event sink error: {0}")]
    Sink(#[from] SinkError),

    /// Metrics or tracing setup error
    #[error("Observability error: {0}")]
    Observability(#[from] ObservabilityError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by upstream configuration stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing document could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing document is not valid
    #[error("Invalid document in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// The store cannot serve reads
    #[error("Store {0} unavailable")]
    Unavailable(String),
}

/// Errors raised by the worker factory or a worker handle
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Worker could not be created
    #[error("Create failed: {0}")]
    Create(String),

    /// Worker could not be closed
    #[error("Close failed: {0}")]
    Close(String),

    /// Worker parameters were rejected
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

/// Event sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Background writer stopped abnormally
    #[error("Writer task failed: {0}")]
    Writer(String),
}

/// Errors that escape a reconciliation tick as a whole
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The desired-state provider failed to serve a snapshot
    #[error("Desired-state provider failed: {0}")]
    Provider(#[from] StoreError),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid bearer token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
