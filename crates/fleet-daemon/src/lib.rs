//! Fleet Daemon library
//!
//! This module provides the core components for the fleet daemon:
//! - Reconciliation loop and actual-state table
//! - Shutdown coordination
//! - Collaborator contracts with file, local-task and sink defaults
//! - Control surface with bearer-token authentication
//! - Server lifecycle management

pub mod api;
pub mod config;
pub mod error;
pub mod pool;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod signals;
pub mod sink;
pub mod store;
pub mod worker;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, ReconcileError, SinkError, StoreError, WorkerError};
pub use scheduler::{ActualState, Reconciler, TickReport};
pub use server::Server;
pub use shutdown::{ExitStatus, ShutdownCoordinator, ShutdownReason, ShutdownTrigger};
