//! Control surface

pub mod auth;
pub mod rest;

pub use auth::{bearer_token, AuthGate};
pub use rest::router::create_router;
pub use rest::state::AppState;
