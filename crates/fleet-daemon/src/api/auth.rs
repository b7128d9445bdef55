//! Bearer-token gate for the control surface

use crate::api::rest::state::AppState;
use crate::config::AuthConfig;
use crate::error::{ApiError, DaemonError};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Paths served without a token
pub const BYPASS_PATHS: [&str; 2] = ["/health", "/version"];

/// Decides whether a presented bearer token is accepted
#[derive(Debug, Clone)]
pub enum AuthGate {
    /// No secrets configured; every request is allowed
    Open,

    /// SHA-256 digests of accepted tokens
    Hashed(Vec<[u8; 32]>),

    /// Accepted tokens in the clear
    Raw(Vec<String>),
}

impl AuthGate {
    pub fn from_config(config: &AuthConfig) -> Result<Self, DaemonError> {
        match (config.token_hashes.is_empty(), config.tokens.is_empty()) {
            (true, true) => Ok(AuthGate::Open),
            (false, true) => {
                let digests = config
                    .token_hashes
                    .iter()
                    .map(|h| parse_digest(h))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(AuthGate::Hashed(digests))
            }
            (true, false) => Ok(AuthGate::Raw(config.tokens.clone())),
            (false, false) => Err(DaemonError::Config(
                "Hashed and raw auth tokens are mutually exclusive".to_string(),
            )),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, AuthGate::Open)
    }

    pub fn mode(&self) -> &'static str {
        match self {
            AuthGate::Open => "open",
            AuthGate::Hashed(_) => "hashed",
            AuthGate::Raw(_) => "raw",
        }
    }

    /// Check a token against the configured secrets
    pub fn allows(&self, token: Option<&str>) -> bool {
        match self {
            AuthGate::Open => true,
            AuthGate::Hashed(digests) => {
                let Some(token) = token else { return false };
                let presented: [u8; 32] = Sha256::digest(token.as_bytes()).into();
                digests
                    .iter()
                    .any(|digest| bool::from(digest[..].ct_eq(&presented[..])))
            }
            AuthGate::Raw(tokens) => {
                let Some(token) = token else { return false };
                tokens
                    .iter()
                    .any(|secret| bool::from(secret.as_bytes().ct_eq(token.as_bytes())))
            }
        }
    }
}

fn parse_digest(hex_digest: &str) -> Result<[u8; 32], DaemonError> {
    let bytes = hex::decode(hex_digest.trim())
        .map_err(|e| DaemonError::Config(format!("Invalid token hash: {}", e)))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        DaemonError::Config(format!(
            "Invalid token hash: expected 32 bytes, got {}",
            bytes.len()
        ))
    })
}

/// Extract the token from an `Authorization: Bearer` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Middleware rejecting requests without an accepted token
pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if BYPASS_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    if state.auth.allows(bearer_token(request.headers())) {
        return next.run(request).await;
    }

    tracing::debug!(path = %request.uri().path(), "Rejected unauthenticated request");
    ApiError::Unauthorized("missing or invalid bearer token".to_string()).into_response()
}
