//! Actual-state table
//!
//! The table is the only owner of live worker handles. It is shared behind a
//! single async mutex that is never held across a factory or handle call.
//! Once sealed for shutdown it refuses new handles.

use crate::worker::WorkerHandle;
use chrono::{DateTime, Utc};
use fleet_types::{TenantId, Version, WorkerId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to the actual state
pub type SharedActualState = Arc<Mutex<ActualState>>;

/// A live worker
pub struct ActualEntry {
    pub tenant_id: TenantId,

    /// Version the handle was created with
    pub version: Version,

    pub handle: Box<dyn WorkerHandle>,
    pub created_at: DateTime<Utc>,
    seq: u64,
}

impl ActualEntry {
    pub fn worker_id(&self) -> &WorkerId {
        self.handle.worker_id()
    }
}

/// Summary of an entry for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub worker_id: WorkerId,
    pub tenant_id: TenantId,
    pub version: Version,
    pub created_at: DateTime<Utc>,
}

/// Worker id -> live handle
#[derive(Default)]
pub struct ActualState {
    entries: BTreeMap<WorkerId, ActualEntry>,
    next_seq: u64,
    sealed: bool,
}

impl ActualState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table behind the shared mutex
    pub fn shared() -> SharedActualState {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn version_of(&self, worker_id: &WorkerId) -> Option<&Version> {
        self.entries.get(worker_id).map(|entry| &entry.version)
    }

    pub fn tenant_of(&self, worker_id: &WorkerId) -> Option<&TenantId> {
        self.entries.get(worker_id).map(|entry| &entry.tenant_id)
    }

    /// Record that a live worker is now declared under another tenant.
    ///
    /// Returns the previous tenant when it changed.
    pub fn retag(&mut self, worker_id: &WorkerId, tenant_id: &TenantId) -> Option<TenantId> {
        let entry = self.entries.get_mut(worker_id)?;
        if &entry.tenant_id == tenant_id {
            return None;
        }
        Some(std::mem::replace(&mut entry.tenant_id, tenant_id.clone()))
    }

    /// Register a freshly created handle.
    ///
    /// Refused once the table has been sealed for shutdown; the handle is
    /// handed back so the caller can close it.
    pub fn register(
        &mut self,
        tenant_id: TenantId,
        version: Version,
        handle: Box<dyn WorkerHandle>,
    ) -> Result<(), Box<dyn WorkerHandle>> {
        if self.sealed {
            return Err(handle);
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let worker_id = handle.worker_id().clone();
        self.entries.insert(
            worker_id,
            ActualEntry {
                tenant_id,
                version,
                handle,
                created_at: Utc::now(),
                seq,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, worker_id: &WorkerId) -> Option<ActualEntry> {
        self.entries.remove(worker_id)
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Seal the table and take every entry, newest first
    pub fn seal_and_drain(&mut self) -> Vec<ActualEntry> {
        self.sealed = true;
        let mut drained: Vec<ActualEntry> =
            std::mem::take(&mut self.entries).into_values().collect();
        drained.sort_by(|a, b| b.seq.cmp(&a.seq));
        drained
    }

    pub fn summaries(&self) -> Vec<WorkerSummary> {
        self.entries
            .iter()
            .map(|(worker_id, entry)| WorkerSummary {
                worker_id: worker_id.clone(),
                tenant_id: entry.tenant_id.clone(),
                version: entry.version.clone(),
                created_at: entry.created_at,
            })
            .collect()
    }
}
