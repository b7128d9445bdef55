//! Event types for fleet observability
//!
//! Events are handed to the configured event sink. The reconciler emits
//! lifecycle events; workers may emit their own through the sink they were
//! created with.

use crate::ids::{TenantId, Version, WorkerId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all fleet events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event source
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// The actual event
    pub event: FleetEvent,
}

impl FleetEventEnvelope {
    /// Wrap an event, deriving its severity
    pub fn new(event: FleetEvent, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source,
            severity: event.severity(),
            event,
        }
    }
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Reconciliation loop
    Reconciler,
    /// A running profile builder
    Worker,
    /// Shutdown coordinator
    Shutdown,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Fleet events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    /// Worker created for an id that had no live handle
    WorkerCreated {
        tenant_id: TenantId,
        worker_id: WorkerId,
        version: Version,
    },

    /// Worker replaced because its version changed
    WorkerReplaced {
        tenant_id: TenantId,
        worker_id: WorkerId,
        from_version: Version,
        to_version: Version,
    },

    /// Worker removed from the fleet
    WorkerRemoved {
        worker_id: WorkerId,
        version: Version,
    },

    /// Factory failed to create a worker
    WorkerCreateFailed {
        tenant_id: TenantId,
        worker_id: WorkerId,
        version: Version,
        reason: String,
    },

    /// Closing a worker handle failed
    WorkerCloseFailed {
        worker_id: WorkerId,
        version: Version,
        reason: String,
    },

    /// Periodic liveness report from a running worker
    WorkerHeartbeat {
        tenant_id: TenantId,
        worker_id: WorkerId,
        version: Version,
        beats: u64,
    },

    /// Shutdown sequence started
    ShutdownStarted { reason: String },
}

impl FleetEvent {
    pub fn severity(&self) -> EventSeverity {
        match self {
            FleetEvent::WorkerCreateFailed { .. } | FleetEvent::WorkerCloseFailed { .. } => {
                EventSeverity::Error
            }
            FleetEvent::ShutdownStarted { .. } => EventSeverity::Warning,
            FleetEvent::WorkerHeartbeat { .. } => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }

    /// Worker id the event is about, if any
    pub fn worker_id(&self) -> Option<&WorkerId> {
        match self {
            FleetEvent::WorkerCreated { worker_id, .. }
            | FleetEvent::WorkerReplaced { worker_id, .. }
            | FleetEvent::WorkerRemoved { worker_id, .. }
            | FleetEvent::WorkerCreateFailed { worker_id, .. }
            | FleetEvent::WorkerCloseFailed { worker_id, .. }
            | FleetEvent::WorkerHeartbeat { worker_id, .. } => Some(worker_id),
            FleetEvent::ShutdownStarted { .. } => None,
        }
    }
}
