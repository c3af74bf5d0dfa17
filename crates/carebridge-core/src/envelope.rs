//! Normalized response envelope
//!
//! Every unified API call produces exactly one [`ResponseEnvelope`]:
//! `{ success, data?, error?, timestamp, requestId }`. `data` is present only
//! on success and `error` only on failure.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default HTTP status paired with an error envelope when none is given
pub const DEFAULT_ERROR_STATUS: u16 = 500;

/// Generate a fresh request id (UUID v4)
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Error payload of a failed envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Response envelope returned by every unified API call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

impl<T> ResponseEnvelope<T> {
    /// Successful envelope carrying `data`
    pub fn ok(data: T, request_id: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
            request_id: request_id.into(),
        }
    }

    /// Failed envelope carrying `error`
    pub fn failure(error: ApiError, request_id: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            timestamp: Utc::now(),
            request_id: request_id.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Transform the payload, keeping id, timestamp and error untouched
    pub fn map<U, F>(self, f: F) -> ResponseEnvelope<U>
    where
        F: FnOnce(T) -> U,
    {
        ResponseEnvelope {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
            timestamp: self.timestamp,
            request_id: self.request_id,
        }
    }

    /// Collapse into a `Result`, discarding envelope metadata
    pub fn into_result(self) -> std::result::Result<T, ApiError> {
        let success = self.success;
        match (self.data, self.error) {
            (Some(data), None) if success => Ok(data),
            (_, Some(error)) => Err(error),
            _ => Err(ApiError {
                code: ErrorCode::SystemError.as_str().to_string(),
                message: "Envelope carried neither data nor error".to_string(),
                details: None,
            }),
        }
    }
}

impl ResponseEnvelope<Value> {
    /// Decode a JSON payload into a concrete type
    pub fn decode<U: DeserializeOwned>(self) -> Result<ResponseEnvelope<U>> {
        let data = match self.data {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };
        Ok(ResponseEnvelope {
            success: self.success,
            data,
            error: self.error,
            timestamp: self.timestamp,
            request_id: self.request_id,
        })
    }
}

/// Build a success envelope; a fresh request id is generated when none is supplied
pub fn respond_ok<T>(data: T, request_id: Option<&str>) -> ResponseEnvelope<T> {
    let request_id = request_id.map(str::to_string).unwrap_or_else(new_request_id);
    ResponseEnvelope::ok(data, request_id)
}

/// Build an error envelope paired with its HTTP status (500 when unspecified)
pub fn respond_error<T>(
    code: impl Into<String>,
    message: impl Into<String>,
    details: Option<Value>,
    status: Option<u16>,
    request_id: Option<&str>,
) -> (ResponseEnvelope<T>, u16) {
    let request_id = request_id.map(str::to_string).unwrap_or_else(new_request_id);
    let envelope = ResponseEnvelope::failure(
        ApiError {
            code: code.into(),
            message: message.into(),
            details,
        },
        request_id,
    );
    (envelope, status.unwrap_or(DEFAULT_ERROR_STATUS))
}

/// Error codes used in failed envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "AUTH_001")]
    AuthenticationFailed,
    #[serde(rename = "API_001")]
    ApiTimeout,
    #[serde(rename = "PERM_001")]
    PermissionDenied,
    #[serde(rename = "VAL_001")]
    ValidationError,
    #[serde(rename = "SYS_001")]
    SystemError,
    #[serde(rename = "UPS_001")]
    UpstreamError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthenticationFailed => "AUTH_001",
            ErrorCode::ApiTimeout => "API_001",
            ErrorCode::PermissionDenied => "PERM_001",
            ErrorCode::ValidationError => "VAL_001",
            ErrorCode::SystemError => "SYS_001",
            ErrorCode::UpstreamError => "UPS_001",
        }
    }

    /// HTTP status a route handler would naturally answer with
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::AuthenticationFailed => 401,
            ErrorCode::ApiTimeout => 504,
            ErrorCode::PermissionDenied => 403,
            ErrorCode::ValidationError => 400,
            ErrorCode::SystemError => 500,
            ErrorCode::UpstreamError => 502,
        }
    }

    /// Classify an upstream HTTP status
    pub fn from_upstream_status(status: u16) -> Self {
        match status {
            401 => ErrorCode::AuthenticationFailed,
            403 => ErrorCode::PermissionDenied,
            400 | 422 => ErrorCode::ValidationError,
            408 | 504 => ErrorCode::ApiTimeout,
            _ => ErrorCode::UpstreamError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AUTH_001" => Ok(ErrorCode::AuthenticationFailed),
            "API_001" => Ok(ErrorCode::ApiTimeout),
            "PERM_001" => Ok(ErrorCode::PermissionDenied),
            "VAL_001" => Ok(ErrorCode::ValidationError),
            "SYS_001" => Ok(ErrorCode::SystemError),
            "UPS_001" => Ok(ErrorCode::UpstreamError),
            other => Err(Error::UnknownErrorCode(other.to_string())),
        }
    }
}
