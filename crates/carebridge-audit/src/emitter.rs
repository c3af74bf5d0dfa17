//! Detached audit emitter
//!
//! `emit` hands an event to a background worker through a bounded channel and
//! returns immediately. Sink failures are logged on the local diagnostic
//! channel (`tracing`) and dropped; they never reach the caller.

use crate::sink::{AuditError, AuditSink, SinkResult};
use carebridge_core::AuditEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Fans audit events out to every configured sink from a detached task
pub struct AuditEmitter {
    tx: mpsc::Sender<AuditEvent>,
    worker_handle: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl AuditEmitter {
    /// Create an emitter writing to the given sinks
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self::with_config(sinks, EmitterConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(sinks: Vec<Arc<dyn AuditSink>>, config: EmitterConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer_size.max(1));

        let worker_handle = tokio::spawn(async move {
            Self::worker_loop(rx, sinks, config).await;
        });

        Self {
            tx,
            worker_handle: Some(worker_handle),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (non-blocking, fire-and-forget)
    ///
    /// Returns false if the event was dropped because the buffer is full or the
    /// worker is gone.
    pub fn emit(&self, event: AuditEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    action = %event.action,
                    request_id = %event.request_id,
                    "Audit buffer full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    action = %event.action,
                    request_id = %event.request_id,
                    "Audit emitter channel closed"
                );
                false
            }
        }
    }

    /// Number of events dropped before reaching the worker
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn worker_loop(
        mut rx: mpsc::Receiver<AuditEvent>,
        sinks: Vec<Arc<dyn AuditSink>>,
        config: EmitterConfig,
    ) {
        let mut buffer = Vec::with_capacity(config.batch_size);
        let mut interval =
            tokio::time::interval(Duration::from_millis(config.batch_timeout_ms.max(1)));

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(event) => {
                        buffer.push(event);

                        if buffer.len() >= config.batch_size {
                            Self::flush_buffer(&sinks, &mut buffer).await;
                        }
                    }
                    None => {
                        // Channel closed, flush remaining and exit
                        Self::flush_buffer(&sinks, &mut buffer).await;
                        break;
                    }
                },
                _ = interval.tick() => {
                    // Periodic flush for low-traffic periods
                    if !buffer.is_empty() {
                        Self::flush_buffer(&sinks, &mut buffer).await;
                    }
                }
            }
        }

        tracing::debug!("Audit emitter worker loop exited");
    }

    async fn flush_buffer(sinks: &[Arc<dyn AuditSink>], buffer: &mut Vec<AuditEvent>) {
        if buffer.is_empty() {
            return;
        }

        let events = std::mem::take(buffer);
        let event_count = events.len();

        let writes: Vec<_> = sinks
            .iter()
            .map(|sink| {
                let events = &events;
                let sink = Arc::clone(sink);
                async move {
                    let result: SinkResult<()> = if sink.supports_batching() {
                        sink.write_batch(events).await
                    } else {
                        let mut outcome = Ok(());
                        for event in events {
                            if let Err(e) = sink.write_event(event).await {
                                outcome = Err(e);
                            }
                        }
                        outcome
                    };
                    (sink, result)
                }
            })
            .collect();

        for (sink, result) in futures::future::join_all(writes).await {
            if let Err(e) = result {
                tracing::error!(
                    sink = sink.name(),
                    error = %e,
                    event_count = event_count,
                    "Failed to write audit events"
                );
            }
            if let Err(e) = sink.flush().await {
                tracing::error!(sink = sink.name(), error = %e, "Failed to flush audit sink");
            }
        }
    }

    /// Gracefully shutdown, flushing all pending events
    pub async fn shutdown(mut self) -> SinkResult<()> {
        let handle = self.worker_handle.take();
        // Dropping the sender closes the channel and lets the worker drain
        let (closed_tx, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.tx, closed_tx));

        if let Some(handle) = handle {
            handle.await.map_err(|_| AuditError::WorkerPanicked)?;
        }

        tracing::info!("Audit emitter shutdown complete");
        Ok(())
    }
}

impl Drop for AuditEmitter {
    fn drop(&mut self) {
        if self.worker_handle.is_some() {
            tracing::warn!(
                "AuditEmitter dropped without calling shutdown(). \
                 Worker will exit but pending events may not be fully flushed."
            );
        }
    }
}

/// Configuration for the audit emitter
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Maximum events to buffer before flushing
    pub batch_size: usize,
    /// Maximum time to wait before flushing (milliseconds)
    pub batch_timeout_ms: u64,
    /// Size of the channel buffer; events beyond it are dropped
    pub channel_buffer_size: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout_ms: 100,
            channel_buffer_size: 10_000,
        }
    }
}

/// Builder for AuditEmitter
pub struct EmitterBuilder {
    sinks: Vec<Arc<dyn AuditSink>>,
    config: EmitterConfig,
}

impl EmitterBuilder {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            config: EmitterConfig::default(),
        }
    }

    pub fn add_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn batch_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.batch_timeout_ms = timeout_ms;
        self
    }

    pub fn channel_buffer_size(mut self, size: usize) -> Self {
        self.config.channel_buffer_size = size;
        self
    }

    pub fn has_sinks(&self) -> bool {
        !self.sinks.is_empty()
    }

    pub fn build(self) -> AuditEmitter {
        AuditEmitter::with_config(self.sinks, self.config)
    }
}

impl Default for EmitterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
