//! Carebridge Session
//!
//! Client- and server-side session handling:
//! - `SessionStore` seam with in-memory and file-backed stores
//! - `TokenGuard`: token refresh state machine with single-flight refresh
//!   and one refresh-and-retry on 401
//! - Refresh endpoint client
//! - Device fingerprint heuristic
//! - Server-side token issuer and auth cookies

pub mod fingerprint;
pub mod guard;
pub mod issuer;
pub mod refresh;
pub mod store;

pub use fingerprint::DeviceFingerprint;
pub use guard::{GuardConfig, TokenGuard, TokenState};
pub use issuer::{AccessClaims, TokenIssuer, access_cookie, refresh_cookie};
pub use refresh::{RefreshClient, resolve_refresh_url};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

use carebridge_egress::EgressError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request failed: {0}")]
    Egress(#[from] EgressError),

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Unauthorized after token refresh")]
    Unauthorized,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
