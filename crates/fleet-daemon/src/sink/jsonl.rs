//! JSON-lines event sink
//!
//! Events are handed to a background writer task over an unbounded channel
//! and appended to the file one JSON document per line.

use super::EventSink;
use crate::error::SinkError;
use async_trait::async_trait;
use fleet_types::FleetEventEnvelope;
use parking_lot::Mutex;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// File-backed sink with append-only writes
pub struct JsonlSink {
    tx: Mutex<Option<mpsc::UnboundedSender<FleetEventEnvelope>>>,
    writer: Mutex<Option<JoinHandle<Result<u64, SinkError>>>>,
}

impl JsonlSink {
    /// Open (or create) the file and start the writer task
    pub async fn open(path: PathBuf) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_events(BufWriter::new(file), rx, path));

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }
}

async fn write_events(
    mut file: BufWriter<tokio::fs::File>,
    mut rx: mpsc::UnboundedReceiver<FleetEventEnvelope>,
    path: PathBuf,
) -> Result<u64, SinkError> {
    let mut written = 0u64;

    while let Some(envelope) = rx.recv().await {
        let line = match serde_json::to_string(&envelope) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(subsystem = "event_sink", error = %e, "Failed to serialize event");
                continue;
            }
        };

        if let Err(e) = write_line(&mut file, &line).await {
            tracing::error!(
                subsystem = "event_sink",
                path = %path.display(),
                error = %e,
                "Failed to append event"
            );
            continue;
        }
        written += 1;
    }

    file.flush().await?;
    Ok(written)
}

async fn write_line(
    file: &mut BufWriter<tokio::fs::File>,
    line: &str,
) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

#[async_trait]
impl EventSink for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn emit(&self, envelope: FleetEventEnvelope) {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(envelope).is_err() {
                    tracing::warn!(subsystem = "event_sink", "Writer task gone, dropping event");
                }
            }
            None => tracing::debug!(subsystem = "event_sink", "Sink closed, dropping event"),
        }
    }

    async fn close(&self) -> Result<(), SinkError> {
        // Dropping the sender lets the writer drain the queue and exit
        drop(self.tx.lock().take());

        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            let written = writer
                .await
                .map_err(|e| SinkError::Writer(e.to_string()))??;
            tracing::debug!(subsystem = "event_sink", written, "Event sink closed");
        }
        Ok(())
    }
}
