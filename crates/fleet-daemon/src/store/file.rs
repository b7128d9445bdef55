//! File-backed stores
//!
//! A [`FileStore`] polls a JSON document on disk. The document is only
//! re-parsed when its modification time changes; a failed refresh keeps
//! serving the previous value and reports `error`.

use super::{DesiredStateProvider, StoreLifecycle};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_types::{DesiredDocument, DesiredSnapshot, SnapshotMeta, StoreState, StoreStatus};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A value a [`FileStore`] can load
pub trait StoreDocument: Sized + Send + Sync + 'static {
    /// Parse the raw file contents
    fn parse(path: &Path, bytes: &[u8], meta: SnapshotMeta) -> Result<Self, StoreError>;

    /// Whether the document declares the store usable
    fn enabled(&self) -> bool;
}

impl StoreDocument for DesiredSnapshot {
    fn parse(path: &Path, bytes: &[u8], meta: SnapshotMeta) -> Result<Self, StoreError> {
        let document: DesiredDocument =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(DesiredSnapshot::from_document(document, meta))
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

impl StoreDocument for serde_json::Value {
    fn parse(path: &Path, bytes: &[u8], _meta: SnapshotMeta) -> Result<Self, StoreError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !value.is_object() {
            return Err(StoreError::Parse {
                path: path.to_path_buf(),
                reason: "expected a JSON object".to_string(),
            });
        }
        Ok(value)
    }

    fn enabled(&self) -> bool {
        self.get("enabled")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true)
    }
}

struct Cached<T> {
    value: Option<Arc<T>>,
    status: StoreStatus,
}

/// Polling store over a JSON file
pub struct FileStore<T> {
    name: String,
    path: PathBuf,
    refresh_interval: Duration,
    cached: RwLock<Cached<T>>,
    ready_tx: watch::Sender<bool>,
    stop_tx: watch::Sender<bool>,
}

impl<T: StoreDocument> FileStore<T> {
    /// Create a store; nothing is loaded until [`FileStore::refresh`] or [`FileStore::spawn`]
    pub fn new(name: impl Into<String>, path: PathBuf, refresh_interval: Duration) -> Arc<Self> {
        let name = name.into();
        let (ready_tx, _) = watch::channel(false);
        let (stop_tx, _) = watch::channel(false);

        Arc::new(Self {
            cached: RwLock::new(Cached {
                value: None,
                status: StoreStatus::loading(name.clone()),
            }),
            name,
            path,
            refresh_interval,
            ready_tx,
            stop_tx,
        })
    }

    /// Last successfully loaded value
    pub fn current(&self) -> Option<Arc<T>> {
        self.cached.read().value.clone()
    }

    /// Load the document once, updating the cached value and status
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let result = self.load().await;
        let now = Utc::now();

        let outcome = {
            let mut cached = self.cached.write();
            cached.status.last_refresh = Some(now);

            match result {
                Ok(Some((value, modified))) => {
                    cached.status.enabled = value.enabled();
                    cached.status.last_modified = modified;
                    cached.status.state = StoreState::Ready;
                    cached.status.last_error = None;
                    cached.value = Some(Arc::new(value));
                    Ok(())
                }
                Ok(None) => {
                    cached.status.state = StoreState::Ready;
                    cached.status.last_error = None;
                    Ok(())
                }
                Err(e) => {
                    cached.status.state = StoreState::Error;
                    cached.status.last_error = Some(e.to_string());
                    if cached.value.is_none() {
                        cached.status.enabled = false;
                    }
                    Err(e)
                }
            }
        };

        self.ready_tx.send_replace(true);
        outcome
    }

    /// Returns `None` when the file is unchanged since the last load
    async fn load(&self) -> Result<Option<(T, Option<DateTime<Utc>>)>, StoreError> {
        let read_err = |source| StoreError::Read {
            path: self.path.clone(),
            source,
        };

        let metadata = tokio::fs::metadata(&self.path).await.map_err(read_err)?;
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        {
            let cached = self.cached.read();
            if cached.value.is_some() && modified.is_some() && cached.status.last_modified == modified {
                return Ok(None);
            }
        }

        let bytes = tokio::fs::read(&self.path).await.map_err(read_err)?;
        let meta = SnapshotMeta {
            last_refresh: Some(Utc::now()),
            last_modified: modified,
        };
        let value = T::parse(&self.path, &bytes, meta)?;
        Ok(Some((value, modified)))
    }

    /// Start background refresh; the first load happens immediately
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            loop {
                if *stop_rx.borrow() {
                    break;
                }

                if let Err(e) = store.refresh().await {
                    tracing::warn!(store = %store.name, error = %e, "Store refresh failed");
                }

                tokio::select! {
                    _ = tokio::time::sleep(store.refresh_interval) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            store.cached.write().status.state = StoreState::Stopped;
            tracing::debug!(store = %store.name, "Store refresh stopped");
        })
    }
}

#[async_trait]
impl<T: StoreDocument> StoreLifecycle for FileStore<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> StoreStatus {
        self.cached.read().status.clone()
    }

    async fn ready(&self) {
        let mut ready_rx = self.ready_tx.subscribe();
        let _ = ready_rx.wait_for(|ready| *ready).await;
    }

    fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

impl DesiredStateProvider for FileStore<DesiredSnapshot> {
    fn snapshot(&self) -> Result<Option<Arc<DesiredSnapshot>>, StoreError> {
        Ok(self.current())
    }
}
