//! Carebridge Egress
//!
//! This crate performs outbound calls to internal and upstream (Zoho proxy,
//! Catalyst function) endpoints:
//! - HTTP client construction and the `Transport` seam
//! - Retry/backoff executor with per-attempt timeouts
//! - Bearer token providers
//! - The unified API client that ties retry, auth and auditing together

pub mod client;
pub mod retry;
pub mod token_provider;
pub mod transport;
pub mod unified;

pub use client::{HttpClientConfig, create_client};
pub use retry::{BackoffConfig, ExecutedResponse, RetryExecutor, RetryPolicy};
pub use token_provider::{FnTokenProvider, NoTokenProvider, StaticTokenProvider, TokenProvider};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use unified::{ApiRequestOptions, ApiResponse, UnifiedApiClient, UnifiedClientConfig};

use carebridge_core::{AuditResult, ErrorCode};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EgressError {
    #[error("HTTP transport error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("HTTP {status}: upstream request failed")]
    Upstream { status: u16, body: Value },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EgressError {
    /// Upstream HTTP status, when the failure carried one
    pub fn status(&self) -> Option<u16> {
        match self {
            EgressError::Upstream { status, .. } => Some(*status),
            EgressError::HttpError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Envelope error code for this failure
    pub fn error_code(&self) -> ErrorCode {
        match self {
            EgressError::Timeout(_) => ErrorCode::ApiTimeout,
            EgressError::HttpError(e) if e.is_timeout() => ErrorCode::ApiTimeout,
            EgressError::Upstream { status, .. } => ErrorCode::from_upstream_status(*status),
            EgressError::InvalidUrl(_) => ErrorCode::ValidationError,
            _ => ErrorCode::SystemError,
        }
    }

    /// Outcome recorded on the post-call audit event
    pub fn audit_result(&self) -> AuditResult {
        match self {
            EgressError::Upstream { .. } => AuditResult::Failure,
            _ => AuditResult::Error,
        }
    }

    /// True for network failures and timeouts (no HTTP answer was received)
    pub fn is_transport(&self) -> bool {
        matches!(self, EgressError::HttpError(_) | EgressError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, EgressError>;
