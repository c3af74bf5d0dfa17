//! Device fingerprint
//!
//! A hash of coarse client traits sent along with refresh requests so the
//! server can notice a refresh token moving between devices. Every input is
//! client-controlled and trivially spoofed: treat a match as a heuristic
//! signal only, never as proof of identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters kept from the digest
const FINGERPRINT_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    /// Hash the given traits into a 32-character hex fingerprint
    ///
    /// `extra` carries any further client signal (for example a canvas
    /// rendering hash); pass `""` when there is none.
    pub fn from_traits(
        user_agent: &str,
        language: &str,
        screen_width: u32,
        screen_height: u32,
        extra: &str,
    ) -> Self {
        // Field delimiters keep boundaries in the digest
        let material = format!(
            "{}|{}|{}x{}|{}",
            user_agent, language, screen_width, screen_height, extra
        );
        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());

        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(FINGERPRINT_LEN);
        Self(digest)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
