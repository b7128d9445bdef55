//! Desired-state model
//!
//! A [`DesiredSnapshot`] is what the reconciler converges on. It is built
//! from a [`DesiredDocument`], the on-disk/JSON form published by the
//! workspace store.

use crate::ids::{TenantId, Version, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One worker declared by a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Worker id, unique across the snapshot
    pub id: WorkerId,

    /// Version token; a change triggers replacement
    pub version: Version,

    /// Tenant-specific parameters handed to the factory untouched
    #[serde(default)]
    pub params: serde_json::Value,
}

impl WorkerSpec {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: WorkerId::new(id),
            version: Version::new(version),
            params: serde_json::Value::Null,
        }
    }

    /// Attach factory parameters
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// Workers declared by one tenant, in declaration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: TenantId,
    pub workers: Vec<WorkerSpec>,
}

impl TenantConfig {
    pub fn new(tenant_id: impl Into<String>, workers: Vec<WorkerSpec>) -> Self {
        Self {
            tenant_id: TenantId::new(tenant_id),
            workers,
        }
    }
}

/// Observability metadata attached to a snapshot by its store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// When the store last refreshed the document
    pub last_refresh: Option<DateTime<Utc>>,

    /// When the underlying document last changed
    pub last_modified: Option<DateTime<Utc>>,
}

/// Point-in-time desired state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredSnapshot {
    /// Whether the store considers itself usable
    pub enabled: bool,

    /// Tenants keyed by id; iteration order is the tenant id order
    pub tenants: BTreeMap<TenantId, TenantConfig>,

    #[serde(default)]
    pub meta: SnapshotMeta,
}

/// Worker entries of a snapshot after duplicate resolution
#[derive(Debug)]
pub struct ResolvedWorkers<'a> {
    /// Entries in tenant-then-declaration order
    pub entries: Vec<(&'a TenantId, &'a WorkerSpec)>,

    /// Ids that were declared more than once (the last declaration won)
    pub duplicates: Vec<WorkerId>,
}

impl DesiredSnapshot {
    /// An enabled snapshot with no tenants
    pub fn empty() -> Self {
        Self {
            enabled: true,
            tenants: BTreeMap::new(),
            meta: SnapshotMeta::default(),
        }
    }

    /// A snapshot reporting the store as unusable
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::empty()
        }
    }

    /// Add or replace a tenant
    pub fn with_tenant(mut self, tenant: TenantConfig) -> Self {
        self.tenants.insert(tenant.tenant_id.clone(), tenant);
        self
    }

    pub fn with_meta(mut self, meta: SnapshotMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Build a snapshot from its document form
    pub fn from_document(document: DesiredDocument, meta: SnapshotMeta) -> Self {
        let tenants = document
            .tenants
            .into_iter()
            .map(|(tenant_id, tenant)| {
                let config = TenantConfig {
                    tenant_id: tenant_id.clone(),
                    workers: tenant.workers,
                };
                (tenant_id, config)
            })
            .collect();

        Self {
            enabled: document.enabled,
            tenants,
            meta,
        }
    }

    /// Every (tenant, worker) pair in deterministic order.
    ///
    /// A worker id declared more than once keeps only its last declaration,
    /// at the position of that declaration.
    pub fn resolve_workers(&self) -> ResolvedWorkers<'_> {
        let all: Vec<(&TenantId, &WorkerSpec)> = self
            .tenants
            .values()
            .flat_map(|tenant| tenant.workers.iter().map(move |w| (&tenant.tenant_id, w)))
            .collect();

        let mut last_seen: HashMap<&WorkerId, usize> = HashMap::with_capacity(all.len());
        for (index, (_, spec)) in all.iter().enumerate() {
            last_seen.insert(&spec.id, index);
        }

        let mut duplicates = Vec::new();
        let mut entries = Vec::with_capacity(last_seen.len());
        for (index, (tenant, spec)) in all.iter().enumerate() {
            if last_seen.get(&spec.id) == Some(&index) {
                entries.push((*tenant, *spec));
            } else if !duplicates.contains(&spec.id) {
                duplicates.push(spec.id.clone());
            }
        }

        ResolvedWorkers {
            entries,
            duplicates,
        }
    }

    /// Set of worker ids present in the snapshot
    pub fn worker_ids(&self) -> BTreeSet<WorkerId> {
        self.tenants
            .values()
            .flat_map(|tenant| tenant.workers.iter().map(|w| w.id.clone()))
            .collect()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_ids().len()
    }
}

/// Serialized form of the desired state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesiredDocument {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub tenants: BTreeMap<TenantId, TenantDocument>,
}

/// Serialized form of one tenant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantDocument {
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
}

fn default_true() -> bool {
    true
}
