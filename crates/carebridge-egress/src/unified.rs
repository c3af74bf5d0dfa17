//! Unified API client
//!
//! Every outbound call goes through [`UnifiedApiClient::request`], which
//! stamps a request id, audits the call before and after dispatch, attaches
//! auth when asked to, runs the retry executor and hands back a normalized
//! envelope. Failures never escape as `Err`: retry exhaustion is folded into a
//! `success: false` envelope carrying an [`ErrorCode`](carebridge_core::ErrorCode).

use crate::client::HttpClientConfig;
use crate::retry::{BackoffConfig, RetryExecutor, RetryPolicy};
use crate::token_provider::TokenProvider;
use crate::transport::{HttpRequest, ReqwestTransport, Transport};
use crate::{EgressError, Result};
use carebridge_audit::AuditEmitter;
use carebridge_core::{
    ApiError, AuditContext, AuditEvent, AuditResult, ResponseEnvelope, new_request_id,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Per-request options
#[derive(Debug, Clone)]
pub struct ApiRequestOptions {
    pub method: Method,
    /// Absolute URL, or a path relative to the configured base URL
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Per-attempt timeout; falls back to the client default
    pub timeout_ms: Option<u64>,
    /// Attempt budget; falls back to the client default
    pub retries: Option<u32>,
    pub requires_auth: bool,
    pub audit_context: Option<AuditContext>,
}

impl ApiRequestOptions {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout_ms: None,
            retries: None,
            requires_auth: false,
            audit_context: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, url).body(body)
    }

    pub fn put(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, url).body(body)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    pub fn with_audit(mut self, context: AuditContext) -> Self {
        self.audit_context = Some(context);
        self
    }
}

/// Result of a unified request
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status of the final attempt; `None` when no response was received
    pub status: Option<u16>,
    /// Response headers of a successful call (lowercased names)
    pub headers: HashMap<String, String>,
    /// Attempts made before the call resolved
    pub attempts: u32,
    pub envelope: ResponseEnvelope<Value>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.envelope.is_success()
    }

    pub fn request_id(&self) -> &str {
        &self.envelope.request_id
    }

    /// Decode the payload into `T`
    pub fn into_typed<T: DeserializeOwned>(self) -> carebridge_core::Result<ResponseEnvelope<T>> {
        self.envelope.decode()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedClientConfig {
    /// Base for relative URLs
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_zoho_proxy_prefix")]
    pub zoho_proxy_prefix: String,

    #[serde(default = "default_catalyst_proxy_prefix")]
    pub catalyst_proxy_prefix: String,

    /// Absolute base for Catalyst functions, bypassing the proxy prefix
    #[serde(default)]
    pub catalyst_function_url: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_retries")]
    pub default_retries: u32,
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_zoho_proxy_prefix() -> String {
    "/zoho".to_string()
}

fn default_catalyst_proxy_prefix() -> String {
    "/catalyst/functions".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retries() -> u32 {
    3
}

impl Default for UnifiedClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            zoho_proxy_prefix: default_zoho_proxy_prefix(),
            catalyst_proxy_prefix: default_catalyst_proxy_prefix(),
            catalyst_function_url: None,
            default_timeout_ms: default_timeout_ms(),
            default_retries: default_retries(),
        }
    }
}

pub struct UnifiedApiClient {
    config: UnifiedClientConfig,
    executor: RetryExecutor,
    token_provider: Option<Arc<dyn TokenProvider>>,
    audit: Option<Arc<AuditEmitter>>,
}

impl UnifiedApiClient {
    pub fn new(config: UnifiedClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            executor: RetryExecutor::new(transport),
            token_provider: None,
            audit: None,
        }
    }

    /// Client over a pooled reqwest transport
    pub fn from_http_config(config: UnifiedClientConfig, http: &HttpClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(http)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn with_audit(mut self, emitter: Arc<AuditEmitter>) -> Self {
        self.audit = Some(emitter);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.executor = self.executor.with_backoff(backoff);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = self.executor.with_policy(policy);
        self
    }

    pub fn config(&self) -> &UnifiedClientConfig {
        &self.config
    }

    /// Absolute URLs pass through; relative ones are joined to the base URL
    pub fn compose_url(&self, url: &str) -> String {
        if is_absolute(url) {
            return url.to_string();
        }
        let base = self.config.base_url.trim_end_matches('/');
        if url.starts_with('/') {
            format!("{}{}", base, url)
        } else {
            format!("{}/{}", base, url)
        }
    }

    pub async fn request(&self, options: ApiRequestOptions) -> ApiResponse {
        let started = Instant::now();
        let request_id = new_request_id();
        let method = options.method.as_str().to_string();

        if let Some(context) = &options.audit_context {
            self.emit(context.event("REQUEST", &request_id).with_method(&method));
        }

        let request = self.build_request(&options, &request_id).await;
        let max_attempts = options.retries.unwrap_or(self.config.default_retries);
        let (outcome, attempts) = self.executor.execute_counted(&request, max_attempts).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(executed) => {
                debug!(
                    request_id = %request_id,
                    status = executed.status,
                    attempts = executed.attempts,
                    duration_ms = duration_ms,
                    "Request completed"
                );
                if let Some(context) = &options.audit_context {
                    self.emit(
                        context
                            .event("RESPONSE", &request_id)
                            .with_method(&method)
                            .with_result(AuditResult::Success)
                            .with_data(json!({
                                "method": method,
                                "status": executed.status,
                                "durationMs": duration_ms,
                                "attempts": executed.attempts,
                            })),
                    );
                }

                ApiResponse {
                    status: Some(executed.status),
                    headers: executed.headers,
                    attempts: executed.attempts,
                    envelope: ResponseEnvelope::ok(executed.data, request_id),
                }
            }
            Err(e) => {
                warn!(
                    request_id = %request_id,
                    url = %request.url,
                    error = %e,
                    duration_ms = duration_ms,
                    "Request failed"
                );
                if let Some(context) = &options.audit_context {
                    self.emit(
                        context
                            .event("ERROR", &request_id)
                            .with_method(&method)
                            .with_result(e.audit_result())
                            .with_error_message(e.to_string())
                            .with_data(json!({
                                "method": method,
                                "status": e.status(),
                                "durationMs": duration_ms,
                                "attempts": attempts,
                            })),
                    );
                }

                ApiResponse {
                    status: e.status(),
                    headers: HashMap::new(),
                    attempts,
                    envelope: ResponseEnvelope::failure(api_error(&e), request_id),
                }
            }
        }
    }

    /// Call through the Zoho proxy; always authenticated
    pub async fn zoho_request(&self, endpoint: &str, mut options: ApiRequestOptions) -> ApiResponse {
        options.url = join_path(&self.config.zoho_proxy_prefix, endpoint);
        options.requires_auth = true;
        self.request(options).await
    }

    /// POST `data` to a Catalyst function; always authenticated
    ///
    /// `options` supplies headers, timeout, retries and audit context; its
    /// method, url and body are replaced.
    pub async fn catalyst_request(
        &self,
        function: &str,
        data: Value,
        mut options: ApiRequestOptions,
    ) -> ApiResponse {
        let base = self
            .config
            .catalyst_function_url
            .as_deref()
            .unwrap_or(&self.config.catalyst_proxy_prefix);
        options.method = Method::POST;
        options.url = join_path(base, function);
        options.body = Some(data);
        options.requires_auth = true;
        self.request(options).await
    }

    async fn build_request(&self, options: &ApiRequestOptions, request_id: &str) -> HttpRequest {
        let timeout_ms = options.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let mut request = HttpRequest::new(options.method.clone(), self.compose_url(&options.url))
            .with_timeout(Duration::from_millis(timeout_ms))
            .with_header("Content-Type", "application/json")
            .with_header("X-Request-ID", request_id);

        for (name, value) in &options.headers {
            request.set_header(name.as_str(), value.as_str());
        }

        if let Some(context) = &options.audit_context {
            if let Some(user_id) = &context.user_id {
                request.set_header("x-user-id", user_id.as_str());
            }
            if let Some(ip) = &context.ip {
                request.set_header("x-forwarded-for", ip.as_str());
            }
        }

        if options.requires_auth {
            match &self.token_provider {
                Some(provider) => match provider.token().await {
                    Some(token) => request.set_header("Authorization", format!("Bearer {}", token)),
                    None => debug!(request_id = %request_id, "No token available, sending unauthenticated"),
                },
                None => debug!(request_id = %request_id, "No token provider configured, sending unauthenticated"),
            }
        }

        if let Some(body) = &options.body {
            request.body = Some(body.to_string());
        }

        request
    }

    fn emit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.emit(event);
        }
    }
}

fn is_absolute(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn join_path(prefix: &str, path: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn api_error(error: &EgressError) -> ApiError {
    let details = match error {
        EgressError::Upstream { status, body } => Some(json!({ "status": status, "body": body })),
        other => other.status().map(|status| json!({ "status": status })),
    };
    ApiError {
        code: error.error_code().as_str().to_string(),
        message: error.to_string(),
        details,
    }
}
