//! Audit sink that renders events as log lines

use crate::sink::{AuditSink, SinkResult};
use async_trait::async_trait;
use carebridge_core::AuditEvent;

/// Writes `[AUDIT] <action>: <result>` through `tracing` under the `audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write_event(&self, event: &AuditEvent) -> SinkResult<()> {
        let result = event.result.map(|r| r.as_str()).unwrap_or("unknown");
        tracing::info!(
            target: "audit",
            user = event.user_id.as_deref().unwrap_or("-"),
            resource = %event.resource,
            ip = %event.ip_address,
            request_id = %event.request_id,
            timestamp = %event.timestamp.to_rfc3339(),
            "[AUDIT] {}: {}",
            event.action,
            result
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}
