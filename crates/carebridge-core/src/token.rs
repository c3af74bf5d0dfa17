//! Access/refresh token pair

use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Credential material for one authenticated session
///
/// Replaced wholesale on refresh; never partially updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// True when `expires_at` falls at or before `now + window`
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at <= now + window
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Parse an ISO-8601 / RFC 3339 expiry string
pub fn parse_expiry(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidTimestamp(format!("{}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_within_window() {
        let now = Utc::now();
        let pair = TokenPair::new("a", "r", now + Duration::minutes(4));

        assert!(pair.expires_within(Duration::minutes(5), now));
        assert!(!pair.expires_within(Duration::minutes(3), now));
        assert!(!pair.is_expired(now));
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let pair = TokenPair::new(
            "access",
            "refresh",
            parse_expiry("2030-01-01T00:00:00Z").unwrap(),
        );
        let wire = serde_json::to_value(&pair).unwrap();

        assert_eq!(wire["accessToken"], "access");
        assert_eq!(wire["refreshToken"], "refresh");
        assert!(wire["expiresAt"].as_str().unwrap().starts_with("2030-01-01"));
    }

    #[test]
    fn test_parse_expiry_rejects_garbage() {
        assert!(parse_expiry("tomorrow").is_err());
        assert!(parse_expiry("2030-01-01T00:00:00+02:00").is_ok());
    }
}
