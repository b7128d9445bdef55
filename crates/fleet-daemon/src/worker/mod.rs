//! Worker contracts
//!
//! A worker is one running profile builder. The reconciler only ever sees
//! it through a [`WorkerHandle`] produced by a [`WorkerFactory`].

mod local;

pub use local::{LocalWorkerFactory, LocalWorkerHandle};

use crate::error::WorkerError;
use crate::sink::EventSink;
use async_trait::async_trait;
use fleet_types::{TenantId, Version, WorkerId, WorkerSpec};
use std::sync::Arc;

/// Capability over one running worker
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    fn worker_id(&self) -> &WorkerId;

    /// Version the worker was created with
    fn version(&self) -> &Version;

    /// Stop the worker.
    ///
    /// Calling `close` again after a failed attempt must be safe.
    async fn close(&self) -> Result<(), WorkerError>;
}

/// Produces workers from their configuration
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn create(
        &self,
        tenant_id: &TenantId,
        spec: &WorkerSpec,
        sink: Arc<dyn EventSink>,
    ) -> Result<Box<dyn WorkerHandle>, WorkerError>;
}
