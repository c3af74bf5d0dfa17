//! Audit event types
//!
//! An [`AuditEvent`] is an immutable record handed to an audit sink. Events
//! are created per request (one before dispatch, one after completion) and are
//! never mutated once built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder used for `ip_address` / `user_agent` when the caller has none
pub const SERVER_ORIGIN: &str = "server";

/// Default `origin` for events emitted by this process
pub const INTERNAL_ORIGIN: &str = "internal";

/// Outcome recorded on post-call events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    Error,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Failure => "failure",
            AuditResult::Error => "error",
        }
    }
}

/// Structured audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
    pub origin: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AuditResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AuditEvent {
    /// Start an event for `action` on `resource`, stamped now
    pub fn new(
        action: impl Into<String>,
        resource: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
            method: None,
            user_id: None,
            ip_address: SERVER_ORIGIN.to_string(),
            user_agent: SERVER_ORIGIN.to_string(),
            timestamp: Utc::now(),
            origin: INTERNAL_ORIGIN.to_string(),
            request_id: request_id.into(),
            result: None,
            error_message: None,
            data: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = ip.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_result(mut self, result: AuditResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Caller-supplied audit information attached to a request
///
/// `action` is a prefix: the client records `<action>_REQUEST` before the
/// call and `<action>_RESPONSE` / `<action>_ERROR` after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditContext {
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

impl AuditContext {
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
            user_id: None,
            ip: None,
            user_agent: None,
            origin: None,
        }
    }

    /// Generic API context (`API_REQUEST` / `API_RESPONSE` / `API_ERROR`)
    pub fn api(resource: impl Into<String>) -> Self {
        Self::new("API", resource)
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Build an event for `<action>_<suffix>` carrying this context's actor fields
    pub fn event(&self, suffix: &str, request_id: &str) -> AuditEvent {
        let mut event = AuditEvent::new(
            format!("{}_{}", self.action, suffix),
            self.resource.clone(),
            request_id,
        )
        .with_user_id(self.user_id.clone())
        .with_ip_address(self.ip.as_deref().unwrap_or(SERVER_ORIGIN))
        .with_user_agent(self.user_agent.as_deref().unwrap_or(SERVER_ORIGIN));

        if let Some(origin) = &self.origin {
            event = event.with_origin(origin.clone());
        }
        event
    }
}
