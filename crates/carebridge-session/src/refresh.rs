//! Refresh endpoint client
//!
//! `POST {refreshToken, deviceFingerprint?}` and expect
//! `{success: true, data: {accessToken, refreshToken, expiresAt}}`. The call
//! is made exactly once; a failed refresh is terminal for the session.

use crate::fingerprint::DeviceFingerprint;
use crate::{Result, SessionError};
use carebridge_core::TokenPair;
use carebridge_core::token::parse_expiry;
use carebridge_egress::{EgressError, HttpRequest, RetryExecutor, Transport};
use chrono::Utc;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Access token lifetime assumed when the endpoint omits `expiresAt`
pub const DEFAULT_ACCESS_TTL_MINUTES: i64 = 15;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequestBody<'a> {
    refresh_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_fingerprint: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshedTokens {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<String>,
}

/// Resolve a refresh URL against the API base: absolute URLs pass through,
/// paths are resolved against the base's origin
pub fn resolve_refresh_url(base_url: &str, refresh_url: &str) -> Result<String> {
    if Url::parse(refresh_url).is_ok() {
        return Ok(refresh_url.to_string());
    }
    let base = Url::parse(base_url)
        .map_err(|e| SessionError::Config(format!("Invalid base URL {}: {}", base_url, e)))?;
    base.join(refresh_url)
        .map(String::from)
        .map_err(|e| SessionError::Config(format!("Invalid refresh URL {}: {}", refresh_url, e)))
}

#[derive(Clone)]
pub struct RefreshClient {
    executor: RetryExecutor,
    url: String,
    timeout: Duration,
}

impl RefreshClient {
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>) -> Self {
        Self {
            executor: RetryExecutor::new(transport),
            url: url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Exchange `refresh_token` for a new pair
    pub async fn refresh(
        &self,
        refresh_token: &str,
        fingerprint: Option<&DeviceFingerprint>,
    ) -> Result<TokenPair> {
        if refresh_token.is_empty() {
            return Err(SessionError::NoRefreshToken);
        }

        let body = serde_json::to_string(&RefreshRequestBody {
            refresh_token,
            device_fingerprint: fingerprint.map(DeviceFingerprint::as_str),
        })?;
        let request = HttpRequest::new(Method::POST, self.url.as_str())
            .with_header("Content-Type", "application/json")
            .with_timeout(self.timeout)
            .with_body(body);

        debug!(url = %self.url, "Refreshing session tokens");
        let response = match self.executor.execute(&request, 1).await {
            Ok(response) => response,
            Err(EgressError::Upstream { status, body }) => {
                let message = error_message(&body).unwrap_or_else(|| format!("HTTP {}", status));
                warn!(status = status, "Refresh endpoint rejected the token: {}", message);
                return Err(SessionError::RefreshRejected(message));
            }
            Err(e) => return Err(e.into()),
        };

        parse_refresh_response(response.data)
    }
}

fn parse_refresh_response(body: Value) -> Result<TokenPair> {
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
    if !success {
        let message = error_message(&body).unwrap_or_else(|| "Token refresh failed".to_string());
        return Err(SessionError::RefreshRejected(message));
    }

    let data = body
        .get("data")
        .cloned()
        .ok_or_else(|| SessionError::RefreshRejected("Refresh response carried no data".to_string()))?;
    let tokens: RefreshedTokens = serde_json::from_value(data)
        .map_err(|e| SessionError::RefreshRejected(format!("Malformed refresh response: {}", e)))?;

    let expires_at = match tokens.expires_at.as_deref() {
        Some(value) => parse_expiry(value).map_err(|e| SessionError::RefreshRejected(e.to_string()))?,
        None => Utc::now() + chrono::Duration::minutes(DEFAULT_ACCESS_TTL_MINUTES),
    };

    Ok(TokenPair::new(tokens.access_token, tokens.refresh_token, expires_at))
}

/// Pull a human message out of `{message}`, `{error: "..."}` or `{error: {message}}`
fn error_message(body: &Value) -> Option<String> {
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    match body.get("error")? {
        Value::String(message) => Some(message.clone()),
        error => error.get("message").and_then(Value::as_str).map(str::to_string),
    }
}
