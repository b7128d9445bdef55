//! Fleet Types - Core types for the profile builder fleet manager
//!
//! The fleet manager keeps one long-running profile builder per configured
//! worker, converging the set of live builders on a desired-state document
//! that can change at runtime.
//!
//! ## Key Concepts
//!
//! - **DesiredSnapshot**: point-in-time view of every tenant and the workers it declares
//! - **WorkerSpec**: one worker entry (id, opaque version token, parameters)
//! - **StoreStatus**: observability metadata reported by an upstream store
//! - **Events**: lifecycle stream emitted by the reconciler and the workers

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod events;
pub mod ids;
pub mod spec;
pub mod store;

pub use events::{EventSeverity, EventSource, FleetEvent, FleetEventEnvelope};
pub use ids::{TenantId, Version, WorkerId};
pub use spec::{
    DesiredDocument, DesiredSnapshot, ResolvedWorkers, SnapshotMeta, TenantConfig, TenantDocument,
    WorkerSpec,
};
pub use store::{StoreState, StoreStatus};
