//! Server-side token issuance
//!
//! Access tokens are `base64url(claims).base64url(hmac_sha256(claims))` with a
//! 15-minute lifetime. Refresh tokens are 256 random bits, base64url encoded.
//! Rotated pairs are delivered through the `refresh-token` and `auth-token`
//! cookies built by [`refresh_cookie`] and [`access_cookie`].

use crate::{Result, SessionError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use carebridge_audit::AuditEmitter;
use carebridge_core::{AuditEvent, AuditResult, TokenPair, new_request_id};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

pub const REFRESH_COOKIE_NAME: &str = "refresh-token";
pub const ACCESS_COOKIE_NAME: &str = "auth-token";
pub const REFRESH_COOKIE_PATH: &str = "/api/auth";

const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const ACCESS_TOKEN_TYPE: &str = "access";
const MIN_SECRET_LEN: usize = 32;

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

pub struct TokenIssuer {
    secret: Vec<u8>,
    audit: Option<Arc<AuditEmitter>>,
}

impl TokenIssuer {
    /// Create an issuer; the signing secret must be at least 32 bytes
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.len() < MIN_SECRET_LEN {
            return Err(SessionError::Config(format!(
                "Signing secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        Ok(Self {
            secret: secret.to_vec(),
            audit: None,
        })
    }

    /// Record a `TOKEN_CREATED` event for every issued pair
    pub fn with_audit(mut self, emitter: Arc<AuditEmitter>) -> Self {
        self.audit = Some(emitter);
        self
    }

    pub fn issue(&self, user_id: &str, role: &str) -> Result<TokenPair> {
        self.issue_at(user_id, role, Utc::now())
    }

    fn issue_at(&self, user_id: &str, role: &str, now: DateTime<Utc>) -> Result<TokenPair> {
        let expires_at = now + Duration::seconds(ACCESS_TOKEN_TTL_SECS);
        let claims = AccessClaims {
            sub: user_id.to_string(),
            role: role.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
        };

        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(payload.as_bytes())?);
        let access_token = format!("{}.{}", payload, signature);

        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let refresh_token = URL_SAFE_NO_PAD.encode(bytes);

        if let Some(audit) = &self.audit {
            audit.emit(
                AuditEvent::new("TOKEN_CREATED", "/api/auth/token", new_request_id())
                    .with_user_id(Some(user_id.to_string()))
                    .with_result(AuditResult::Success)
                    .with_data(json!({ "expiresAt": expires_at.to_rfc3339() })),
            );
        }

        Ok(TokenPair::new(access_token, refresh_token, expires_at))
    }

    /// Check signature, token type and expiry, returning the claims
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims> {
        self.verify_access_at(token, Utc::now())
    }

    fn verify_access_at(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims> {
        let (payload, signature) = token
            .split_once('.')
            .ok_or_else(|| SessionError::InvalidToken("malformed token".to_string()))?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SessionError::InvalidToken("malformed signature".to_string()))?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SessionError::InvalidToken("signature mismatch".to_string()))?;

        let claims: AccessClaims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| SessionError::InvalidToken("malformed claims".to_string()))?;

        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(SessionError::InvalidToken(format!(
                "unexpected token type {}",
                claims.token_type
            )));
        }
        if claims.exp <= now.timestamp() {
            return Err(SessionError::InvalidToken("token expired".to_string()));
        }
        Ok(claims)
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| SessionError::Config(format!("Invalid signing secret: {}", e)))
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// `Set-Cookie` value delivering a rotated refresh token
pub fn refresh_cookie(refresh_token: &str) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Strict; Max-Age={}; Path={}",
        REFRESH_COOKIE_NAME, refresh_token, REFRESH_TOKEN_TTL_SECS, REFRESH_COOKIE_PATH
    )
}

/// `Set-Cookie` value delivering the companion access token
pub fn access_cookie(access_token: &str) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Strict; Max-Age={}; Path=/",
        ACCESS_COOKIE_NAME, access_token, ACCESS_TOKEN_TTL_SECS
    )
}
