//! In-process profile builders
//!
//! Each worker runs as a tokio task that reports a heartbeat to the event
//! sink until it is closed.

use super::{WorkerFactory, WorkerHandle};
use crate::error::WorkerError;
use crate::sink::{record, EventSink};
use crate::store::FileStore;
use async_trait::async_trait;
use fleet_types::{EventSource, FleetEvent, TenantId, Version, WorkerId, WorkerSpec};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Parameters understood by the local builder
#[derive(Debug, Clone, Deserialize)]
struct BuilderParams {
    #[serde(default = "default_heartbeat_secs")]
    heartbeat_secs: u64,
}

fn default_heartbeat_secs() -> u64 {
    30
}

/// Factory for in-process builders
#[derive(Default)]
pub struct LocalWorkerFactory {
    defaults: Option<Arc<FileStore<serde_json::Value>>>,
}

impl LocalWorkerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge parameters from the settings store under every worker's own
    pub fn with_defaults(mut self, settings: Arc<FileStore<serde_json::Value>>) -> Self {
        self.defaults = Some(settings);
        self
    }

    fn effective_params(&self, spec: &WorkerSpec) -> serde_json::Value {
        let defaults = self.defaults.as_ref().and_then(|store| store.current());
        merge_params(defaults.as_deref(), &spec.params)
    }
}

/// Shallow merge: keys of `params` win over `defaults`
fn merge_params(
    defaults: Option<&serde_json::Value>,
    params: &serde_json::Value,
) -> serde_json::Value {
    let mut merged = match defaults {
        Some(serde_json::Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };
    merged.remove("enabled");

    match params {
        serde_json::Value::Object(own) => {
            for (key, value) in own {
                merged.insert(key.clone(), value.clone());
            }
        }
        serde_json::Value::Null => {}
        other => return other.clone(),
    }

    serde_json::Value::Object(merged)
}

#[async_trait]
impl WorkerFactory for LocalWorkerFactory {
    async fn create(
        &self,
        tenant_id: &TenantId,
        spec: &WorkerSpec,
        sink: Arc<dyn EventSink>,
    ) -> Result<Box<dyn WorkerHandle>, WorkerError> {
        let params: BuilderParams = serde_json::from_value(self.effective_params(spec))
            .map_err(|e| WorkerError::InvalidParams(e.to_string()))?;
        if params.heartbeat_secs == 0 {
            return Err(WorkerError::InvalidParams(
                "heartbeat_secs must be positive".to_string(),
            ));
        }

        let handle = LocalWorkerHandle::spawn(
            tenant_id.clone(),
            spec.id.clone(),
            spec.version.clone(),
            Duration::from_secs(params.heartbeat_secs),
            sink,
        );
        Ok(Box::new(handle))
    }
}

/// Handle over an in-process builder task
pub struct LocalWorkerHandle {
    worker_id: WorkerId,
    version: Version,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalWorkerHandle {
    fn spawn(
        tenant_id: TenantId,
        worker_id: WorkerId,
        version: Version,
        heartbeat: Duration,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = {
            let worker_id = worker_id.clone();
            let version = version.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(heartbeat);
                // First tick completes immediately
                ticker.tick().await;
                let mut beats = 0u64;

                loop {
                    tokio::select! {
                        _ = stop_rx.changed() => break,
                        _ = ticker.tick() => {
                            beats += 1;
                            record(
                                sink.as_ref(),
                                FleetEvent::WorkerHeartbeat {
                                    tenant_id: tenant_id.clone(),
                                    worker_id: worker_id.clone(),
                                    version: version.clone(),
                                    beats,
                                },
                                EventSource::Worker,
                            );
                        }
                    }
                }

                tracing::debug!(worker_id = %worker_id, version = %version, beats, "Builder stopped");
            })
        };

        Self {
            worker_id,
            version,
            stop_tx,
            task: Mutex::new(Some(task)),
        }
    }
}

#[async_trait]
impl WorkerHandle for LocalWorkerHandle {
    fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    fn version(&self) -> &Version {
        &self.version
    }

    async fn close(&self) -> Result<(), WorkerError> {
        let _ = self.stop_tx.send(true);

        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            handle
                .await
                .map_err(|e| WorkerError::Close(format!("builder task failed: {}", e)))?;
        }
        Ok(())
    }
}
