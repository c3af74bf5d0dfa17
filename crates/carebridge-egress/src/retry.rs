//! Retry/backoff executor
//!
//! Each attempt runs under its own deadline; an attempt that outlives it is
//! cancelled by dropping its future. After a failed attempt `k` (counting from
//! zero) the executor sleeps `min(max_delay, base_delay * 2^k)` before trying
//! again, and rethrows the last error once the attempt budget is spent.

use crate::transport::{HttpRequest, Transport};
use crate::{EgressError, Result};
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Header that marks a non-idempotent request as safe to replay
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(16_000),
        }
    }
}

impl BackoffConfig {
    /// Delay to wait after failed attempt `attempt` (zero-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Which failures are worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Retry every failure, whatever the method or status
    #[default]
    All,
    /// Retry only transport failures and 502/503/504, and only when the
    /// request is idempotent (by method or via an `Idempotency-Key` header)
    IdempotentTransient,
}

impl RetryPolicy {
    pub fn should_retry(&self, request: &HttpRequest, error: &EgressError) -> bool {
        match self {
            RetryPolicy::All => true,
            RetryPolicy::IdempotentTransient => {
                let idempotent = is_idempotent(&request.method)
                    || request.header(IDEMPOTENCY_KEY_HEADER).is_some();
                let transient = match error {
                    EgressError::HttpError(_) | EgressError::Timeout(_) => true,
                    EgressError::Upstream { status, .. } => matches!(status, 502..=504),
                    _ => false,
                };
                idempotent && transient
            }
        }
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}

/// Successful exchange with its body parsed
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedResponse {
    /// Parsed JSON, or the raw text when the body is not JSON
    pub data: Value,
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// Parse a response body: JSON when possible, raw text otherwise, null when empty
pub fn parse_body(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Runs one request through the transport with bounded retries
#[derive(Clone)]
pub struct RetryExecutor {
    transport: Arc<dyn Transport>,
    backoff: BackoffConfig,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            backoff: BackoffConfig::default(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Execute `request`, making at most `max_attempts` attempts (minimum one)
    pub async fn execute(&self, request: &HttpRequest, max_attempts: u32) -> Result<ExecutedResponse> {
        self.execute_counted(request, max_attempts).await.0
    }

    /// Like [`execute`](Self::execute), also reporting how many attempts were made
    pub async fn execute_counted(
        &self,
        request: &HttpRequest,
        max_attempts: u32,
    ) -> (Result<ExecutedResponse>, u32) {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.attempt(request).await {
                Ok(mut response) => {
                    response.attempts = attempt + 1;
                    return (Ok(response), attempt + 1);
                }
                Err(e) => {
                    let remaining = attempt + 1 < max_attempts;
                    if !remaining || !self.policy.should_retry(request, &e) {
                        return (Err(e), attempt + 1);
                    }

                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        method = %request.method,
                        url = %request.url,
                        attempt = attempt + 1,
                        max_attempts = max_attempts,
                        error = %e,
                        "Request attempt failed"
                    );
                    debug!(
                        "Retrying request after {}ms (attempt {}/{})",
                        delay.as_millis(),
                        attempt + 2,
                        max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, request: &HttpRequest) -> Result<ExecutedResponse> {
        let response = tokio::time::timeout(request.timeout, self.transport.send(request))
            .await
            .map_err(|_| EgressError::Timeout(request.timeout.as_millis() as u64))??;

        let data = parse_body(&response.body);
        if !response.is_success() {
            return Err(EgressError::Upstream {
                status: response.status,
                body: data,
            });
        }

        Ok(ExecutedResponse {
            data,
            status: response.status,
            headers: response.headers,
            attempts: 1,
        })
    }
}
