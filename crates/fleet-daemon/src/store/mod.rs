//! Upstream configuration stores
//!
//! Stores refresh themselves in the background and serve their last good
//! value without blocking. The workspace store doubles as the
//! [`DesiredStateProvider`] read by the reconciler.

mod file;

pub use file::{FileStore, StoreDocument};

use crate::error::StoreError;
use async_trait::async_trait;
use fleet_types::{DesiredSnapshot, StoreStatus};
use std::sync::Arc;

/// Lifecycle shared by every upstream store
#[async_trait]
pub trait StoreLifecycle: Send + Sync {
    fn name(&self) -> &str;

    /// Current load status and staleness metadata
    fn status(&self) -> StoreStatus;

    /// Resolves once the first load attempt has finished
    async fn ready(&self);

    /// Stop background refresh
    fn stop(&self);
}

/// Source of desired state for the reconciler
pub trait DesiredStateProvider: Send + Sync {
    /// Latest cached snapshot.
    ///
    /// `Ok(None)` means nothing has been loaded yet; an error means the
    /// provider itself is broken.
    fn snapshot(&self) -> Result<Option<Arc<DesiredSnapshot>>, StoreError>;
}
