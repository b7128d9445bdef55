//! Event sinks
//!
//! The sink receives lifecycle events from the reconciler and whatever the
//! workers choose to report. `emit` never blocks; delivery happens in the
//! background for sinks that talk to something external.

mod jsonl;

pub use jsonl::JsonlSink;

use crate::config::{EventSinkKind, EventsConfig};
use crate::error::SinkError;
use async_trait::async_trait;
use fleet_types::{EventSource, FleetEvent, FleetEventEnvelope};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Destination for fleet events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Queue an event for delivery
    fn emit(&self, envelope: FleetEventEnvelope);

    /// Flush pending events and release the backend
    async fn close(&self) -> Result<(), SinkError>;
}

/// Wrap and emit an event
pub fn record(sink: &dyn EventSink, event: FleetEvent, source: EventSource) {
    sink.emit(FleetEventEnvelope::new(event, source));
}

/// Sink that drops every event
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn emit(&self, _envelope: FleetEventEnvelope) {}

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// In-memory sink for testing
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<FleetEventEnvelope>>,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far
    pub fn events(&self) -> Vec<FleetEvent> {
        self.events.lock().iter().map(|e| e.event.clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn emit(&self, envelope: FleetEventEnvelope) {
        self.events.lock().push(envelope);
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Create the sink selected by configuration
pub async fn create_sink(config: &EventsConfig) -> Result<Arc<dyn EventSink>, SinkError> {
    match config.sink {
        EventSinkKind::Noop => Ok(Arc::new(NoopSink)),
        EventSinkKind::Jsonl => {
            let sink = JsonlSink::open(config.path.clone()).await?;
            Ok(Arc::new(sink))
        }
    }
}
