//! Error types for fleet-observability

use thiserror::Error;

/// Errors that can occur in observability operations
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// Metrics-related error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Tracing-related error
    #[error("Tracing error: {0}")]
    Tracing(String),
}

impl From<prometheus::Error> for ObservabilityError {
    fn from(err: prometheus::Error) -> Self {
        ObservabilityError::Metrics(err.to_string())
    }
}

/// Result type alias for observability operations
pub type Result<T> = std::result::Result<T, ObservabilityError>;
