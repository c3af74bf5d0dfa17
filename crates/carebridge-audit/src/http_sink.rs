//! HTTP audit sink
//!
//! POSTs each event as JSON to a log endpoint. A non-2xx answer is a sink
//! error; the emitter logs it and moves on.

use crate::sink::{AuditError, AuditSink, SinkResult};
use async_trait::async_trait;
use carebridge_core::AuditEvent;
use reqwest::Client;
use std::time::Duration;

pub struct HttpAuditSink {
    client: Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl HttpAuditSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> SinkResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Reuse an existing client (shares its connection pool)
    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AuditSink for HttpAuditSink {
    async fn write_event(&self, event: &AuditEvent) -> SinkResult<()> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("X-Request-ID", &event.request_id)
            .json(event);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuditError::Rejected(status.as_u16()));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_event_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audit"))
            .and(header("x-request-id", "req-77"))
            .and(header("authorization", "Bearer sink-token"))
            .and(body_partial_json(serde_json::json!({
                "action": "API_REQUEST",
                "request_id": "req-77"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpAuditSink::new(format!("{}/audit", server.uri()), Duration::from_secs(5))
            .unwrap()
            .with_bearer_token("sink-token");
        sink.write_event(&AuditEvent::new("API_REQUEST", "/zoho", "req-77"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejection_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sink = HttpAuditSink::new(server.uri(), Duration::from_secs(5)).unwrap();
        let result = sink
            .write_event(&AuditEvent::new("API_REQUEST", "/zoho", "req-1"))
            .await;

        assert!(matches!(result, Err(AuditError::Rejected(503))));
    }
}
