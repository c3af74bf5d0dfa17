//! Bearer token providers
//!
//! The unified client asks its provider for a token on every authenticated
//! request. A provider that yields `None` lets the request go out without an
//! `Authorization` header.

use async_trait::async_trait;
use std::fmt;

/// Source of bearer tokens for outbound requests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Resolve the current token, if any
    async fn token(&self) -> Option<String>;
}

/// Provider that never has a token
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTokenProvider;

#[async_trait]
impl TokenProvider for NoTokenProvider {
    async fn token(&self) -> Option<String> {
        None
    }
}

/// Fixed service token for backend-to-backend calls
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

/// Provider backed by a synchronous closure
pub struct FnTokenProvider<F> {
    f: F,
}

impl<F> FnTokenProvider<F>
where
    F: Fn() -> Option<String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> TokenProvider for FnTokenProvider<F>
where
    F: Fn() -> Option<String> + Send + Sync,
{
    async fn token(&self) -> Option<String> {
        (self.f)()
    }
}
