//! Audit sink configuration

use crate::emitter::{AuditEmitter, EmitterBuilder};
use crate::http_sink::HttpAuditSink;
use crate::jsonl_sink::JsonlAuditSink;
use crate::sink::SinkResult;
use crate::tracing_sink::TracingAuditSink;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit emission
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Render events as log lines
    #[serde(default = "default_true")]
    pub log_events: bool,

    /// JSONL sink configuration
    #[serde(default)]
    pub jsonl: Option<JsonlSinkConfig>,

    /// HTTP log endpoint configuration
    #[serde(default)]
    pub http: Option<HttpSinkConfig>,

    /// Background worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_events: true,
            jsonl: None,
            http: None,
            worker: WorkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonlSinkConfig {
    /// Directory for daily audit files
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSinkConfig {
    /// Log endpoint receiving one POST per event
    pub endpoint: String,

    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl HttpSinkConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout_ms: default_http_timeout_ms(),
            bearer_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum events to buffer before flushing
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum time to wait before flushing (milliseconds)
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Events accepted before `emit` starts dropping
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            channel_buffer_size: default_channel_buffer_size(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_http_timeout_ms() -> u64 {
    5_000
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_ms() -> u64 {
    100
}

fn default_channel_buffer_size() -> usize {
    10_000
}

impl AuditConfig {
    pub fn has_sinks(&self) -> bool {
        self.enabled && (self.log_events || self.jsonl.is_some() || self.http.is_some())
    }
}

/// Build an AuditEmitter from configuration
///
/// Returns `None` when auditing is disabled or no sink is configured.
pub fn build_from_config(config: &AuditConfig) -> SinkResult<Option<AuditEmitter>> {
    if !config.has_sinks() {
        return Ok(None);
    }

    let mut builder = EmitterBuilder::new()
        .batch_size(config.worker.batch_size)
        .batch_timeout_ms(config.worker.batch_timeout_ms)
        .channel_buffer_size(config.worker.channel_buffer_size);

    if config.log_events {
        builder = builder.add_sink(Arc::new(TracingAuditSink));
    }

    if let Some(jsonl) = &config.jsonl {
        tracing::info!(directory = %jsonl.directory.display(), "JSONL audit sink enabled");
        builder = builder.add_sink(Arc::new(JsonlAuditSink::new(jsonl.directory.clone())));
    }

    if let Some(http) = &config.http {
        tracing::info!(endpoint = %http.endpoint, "HTTP audit sink enabled");
        let mut sink = HttpAuditSink::new(&http.endpoint, Duration::from_millis(http.timeout_ms))?;
        if let Some(token) = &http.bearer_token {
            sink = sink.with_bearer_token(token);
        }
        builder = builder.add_sink(Arc::new(sink));
    }

    Ok(Some(builder.build()))
}
