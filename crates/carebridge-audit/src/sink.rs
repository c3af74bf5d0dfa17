//! Audit sink trait

use async_trait::async_trait;
use carebridge_core::AuditEvent;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Audit endpoint rejected event with status {0}")]
    Rejected(u16),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Emitter worker panicked")]
    WorkerPanicked,
}

pub type SinkResult<T> = Result<T, AuditError>;

/// Destination for audit events
///
/// Sinks are append-only: nothing in this crate reads back from or deletes
/// from a sink except the in-memory diagnostics sink.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Write a single event
    async fn write_event(&self, event: &AuditEvent) -> SinkResult<()>;

    /// Write a batch of events (for efficiency)
    async fn write_batch(&self, events: &[AuditEvent]) -> SinkResult<()> {
        for event in events {
            self.write_event(event).await?;
        }
        Ok(())
    }

    /// Flush any pending writes
    async fn flush(&self) -> SinkResult<()> {
        Ok(())
    }

    /// Check if this sink supports batching
    fn supports_batching(&self) -> bool {
        false
    }

    /// Short name used in diagnostics
    fn name(&self) -> &'static str;
}
