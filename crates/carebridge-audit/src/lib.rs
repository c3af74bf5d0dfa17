//! Carebridge Audit Logging
//!
//! This crate provides best-effort audit event emission:
//! - The `AuditSink` trait and stock sinks (JSONL, HTTP, in-memory, tracing)
//! - A detached background emitter that never blocks or fails its caller
//! - Sink configuration

pub mod config;
pub mod emitter;
pub mod http_sink;
pub mod jsonl_sink;
pub mod memory_sink;
pub mod sink;
pub mod tracing_sink;

pub use config::{AuditConfig, HttpSinkConfig, JsonlSinkConfig, WorkerConfig, build_from_config};
pub use emitter::{AuditEmitter, EmitterBuilder, EmitterConfig};
pub use http_sink::HttpAuditSink;
pub use jsonl_sink::JsonlAuditSink;
pub use memory_sink::{AuditRecord, ChainVerification, MemoryAuditSink};
pub use sink::{AuditError, AuditSink, SinkResult};
pub use tracing_sink::TracingAuditSink;
