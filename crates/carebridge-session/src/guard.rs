//! Token refresh guard
//!
//! State machine over the stored [`TokenPair`]:
//!
//! ```text
//! NoToken --set_tokens--> Valid --(within refresh window)--> NeedsRefresh
//! NeedsRefresh --> Refreshing --ok--> Valid
//!                             --err--> Invalid --logout/set_tokens--> NoToken/Valid
//! ```
//!
//! Refreshes are single-flight: callers that need a token while a refresh is
//! running wait on the same lock and pick up the rotated pair instead of
//! issuing their own call.

use crate::fingerprint::DeviceFingerprint;
use crate::refresh::RefreshClient;
use crate::store::SessionStore;
use crate::{Result, SessionError};
use async_trait::async_trait;
use carebridge_core::TokenPair;
use carebridge_egress::{EgressError, HttpRequest, HttpResponse, TokenProvider, Transport};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const UNAUTHORIZED: u16 = 401;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Refresh once the access token expires within this many seconds
    #[serde(default = "default_refresh_window_secs")]
    pub refresh_window_secs: i64,

    /// Sent with refresh requests when set
    #[serde(default)]
    pub device_fingerprint: Option<DeviceFingerprint>,
}

fn default_refresh_window_secs() -> i64 {
    5 * 60
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            refresh_window_secs: default_refresh_window_secs(),
            device_fingerprint: None,
        }
    }
}

impl GuardConfig {
    fn refresh_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_window_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    Valid,
    NeedsRefresh,
    Refreshing,
    Invalid,
}

pub struct TokenGuard {
    store: Arc<dyn SessionStore>,
    refresher: RefreshClient,
    transport: Arc<dyn Transport>,
    config: GuardConfig,
    refresh_lock: Mutex<()>,
    refreshing: AtomicBool,
    invalid: AtomicBool,
}

impl TokenGuard {
    /// `transport` carries both refresh calls and [`authenticated_send`](Self::authenticated_send)
    pub fn new(
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn Transport>,
        refresh_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            refresher: RefreshClient::new(transport.clone(), refresh_url),
            transport,
            config: GuardConfig::default(),
            refresh_lock: Mutex::new(()),
            refreshing: AtomicBool::new(false),
            invalid: AtomicBool::new(false),
        }
    }

    pub fn with_config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_refresher(mut self, refresher: RefreshClient) -> Self {
        self.refresher = refresher;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub async fn state(&self) -> Result<TokenState> {
        if self.invalid.load(Ordering::SeqCst) {
            return Ok(TokenState::Invalid);
        }
        if self.refreshing.load(Ordering::SeqCst) {
            return Ok(TokenState::Refreshing);
        }
        Ok(match self.store.get().await? {
            None => TokenState::NoToken,
            Some(pair) if self.needs_refresh(&pair) => TokenState::NeedsRefresh,
            Some(_) => TokenState::Valid,
        })
    }

    /// Store a freshly obtained pair (login)
    pub async fn set_tokens(&self, tokens: TokenPair) -> Result<()> {
        self.store.set(tokens).await?;
        self.invalid.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Drop the session; an `Invalid` guard returns to `NoToken`
    pub async fn logout(&self) -> Result<()> {
        self.store.clear().await?;
        self.invalid.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// True while an unexpired access token is stored
    pub async fn is_authenticated(&self) -> bool {
        if self.invalid.load(Ordering::SeqCst) {
            return false;
        }
        match self.store.get().await {
            Ok(Some(pair)) => !pair.is_expired(Utc::now()),
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to read session store: {}", e);
                false
            }
        }
    }

    /// Current access token, refreshing first when it is inside the refresh window
    pub async fn get_valid_token(&self) -> Result<Option<String>> {
        let Some(pair) = self.store.get().await? else {
            if self.invalid.load(Ordering::SeqCst) {
                return Err(SessionError::NotAuthenticated);
            }
            return Ok(None);
        };
        if !self.needs_refresh(&pair) {
            return Ok(Some(pair.access_token));
        }
        let refreshed = self.refresh_from(&pair.access_token).await?;
        Ok(Some(refreshed.access_token))
    }

    /// Refresh now, regardless of the current expiry
    pub async fn refresh(&self) -> Result<TokenPair> {
        let current = self
            .store
            .get()
            .await?
            .ok_or(SessionError::NoRefreshToken)?;
        self.refresh_from(&current.access_token).await
    }

    /// Send `request` with the current bearer token
    ///
    /// A 401 triggers one refresh and one resend. If the resend is also
    /// rejected with 401 the session is cleared and `Unauthorized` returned.
    pub async fn authenticated_send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let token = self
            .get_valid_token()
            .await?
            .ok_or(SessionError::NotAuthenticated)?;

        let mut request = request.clone();
        request.set_header("Authorization", format!("Bearer {}", token));
        let response = self.send(&request).await?;
        if response.status != UNAUTHORIZED {
            return Ok(response);
        }

        warn!(url = %request.url, "Request rejected with 401, refreshing once");
        let refreshed = self.refresh_from(&token).await?;
        request.set_header("Authorization", format!("Bearer {}", refreshed.access_token));

        let retried = self.send(&request).await?;
        if retried.status == UNAUTHORIZED {
            warn!(url = %request.url, "Still unauthorized after refresh, clearing session");
            self.invalidate().await;
            return Err(SessionError::Unauthorized);
        }
        Ok(retried)
    }

    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        tokio::time::timeout(request.timeout, self.transport.send(request))
            .await
            .map_err(|_| EgressError::Timeout(request.timeout.as_millis() as u64))?
            .map_err(SessionError::from)
    }

    fn needs_refresh(&self, pair: &TokenPair) -> bool {
        pair.expires_within(self.config.refresh_window(), Utc::now())
    }

    /// Single-flight refresh of the pair whose access token is `stale_access`
    ///
    /// If another caller rotated the pair while this one waited for the lock,
    /// the rotated pair is returned without a second refresh call.
    async fn refresh_from(&self, stale_access: &str) -> Result<TokenPair> {
        let _guard = self.refresh_lock.lock().await;

        let Some(current) = self.store.get().await? else {
            return Err(if self.invalid.load(Ordering::SeqCst) {
                SessionError::RefreshRejected("session invalidated by a failed refresh".to_string())
            } else {
                SessionError::NoRefreshToken
            });
        };
        if current.access_token != stale_access {
            debug!("Tokens already rotated by a concurrent refresh");
            return Ok(current);
        }

        let result = {
            let _refreshing = RefreshingFlag::raise(&self.refreshing);
            self.refresher
                .refresh(&current.refresh_token, self.config.device_fingerprint.as_ref())
                .await
        };

        match result {
            Ok(pair) => {
                self.store.set(pair.clone()).await?;
                self.invalid.store(false, Ordering::SeqCst);
                info!(expires_at = %pair.expires_at.to_rfc3339(), "Session tokens refreshed");
                Ok(pair)
            }
            Err(e) => {
                warn!("Token refresh failed, clearing session: {}", e);
                self.invalidate().await;
                Err(e)
            }
        }
    }

    async fn invalidate(&self) {
        self.invalid.store(true, Ordering::SeqCst);
        if let Err(e) = self.store.clear().await {
            warn!("Failed to clear session store: {}", e);
        }
    }
}

/// Holds the `Refreshing` flag up for as long as it lives
///
/// Lowered on drop, so a caller abandoned mid-refresh clears it too.
struct RefreshingFlag<'a>(&'a AtomicBool);

impl<'a> RefreshingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RefreshingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenProvider for TokenGuard {
    async fn token(&self) -> Option<String> {
        match self.get_valid_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!("No valid session token: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use chrono::Duration as ChronoDuration;
    use reqwest::Method;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    const REFRESH_URL: &str = "http://auth.test/api/auth/refresh";
    const API_URL: &str = "http://api.test/patients";

    /// In-process auth server: rotates tokens at the refresh URL and rejects
    /// revoked access tokens elsewhere
    struct FakeAuthServer {
        refresh_calls: AtomicU32,
        api_calls: AtomicU32,
        refresh_delay: Duration,
        refresh_response: StdMutex<(u16, serde_json::Value)>,
        rejected_tokens: StdMutex<HashSet<String>>,
        seen_auth: StdMutex<Vec<String>>,
    }

    impl FakeAuthServer {
        fn new() -> Arc<Self> {
            Self::with_refresh_delay(Duration::from_millis(50))
        }

        fn with_refresh_delay(refresh_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                refresh_calls: AtomicU32::new(0),
                api_calls: AtomicU32::new(0),
                refresh_delay,
                refresh_response: StdMutex::new((200, rotated_body("access-2", "refresh-2"))),
                rejected_tokens: StdMutex::new(HashSet::new()),
                seen_auth: StdMutex::new(Vec::new()),
            })
        }

        fn respond_to_refresh(&self, status: u16, body: serde_json::Value) {
            *self.refresh_response.lock().unwrap() = (status, body);
        }

        fn reject(&self, token: &str) {
            self.rejected_tokens.lock().unwrap().insert(token.to_string());
        }

        fn refresh_calls(&self) -> u32 {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FakeAuthServer {
        async fn send(&self, request: &HttpRequest) -> carebridge_egress::Result<HttpResponse> {
            let respond = |status: u16, body: serde_json::Value| HttpResponse {
                status,
                headers: HashMap::new(),
                body: body.to_string(),
            };

            if request.url == REFRESH_URL {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.refresh_delay).await;
                let (status, body) = self.refresh_response.lock().unwrap().clone();
                return Ok(respond(status, body));
            }

            self.api_calls.fetch_add(1, Ordering::SeqCst);
            let auth = request.header("authorization").unwrap_or_default().to_string();
            self.seen_auth.lock().unwrap().push(auth.clone());
            let token = auth.trim_start_matches("Bearer ");
            if self.rejected_tokens.lock().unwrap().contains(token) {
                return Ok(respond(401, json!({"error": "Unauthorized"})));
            }
            Ok(respond(200, json!({"patients": []})))
        }
    }

    fn rotated_body(access: &str, refresh: &str) -> serde_json::Value {
        json!({
            "success": true,
            "data": {
                "accessToken": access,
                "refreshToken": refresh,
                "expiresAt": (Utc::now() + ChronoDuration::hours(1)).to_rfc3339(),
            }
        })
    }

    fn pair_expiring_in(minutes: i64) -> TokenPair {
        TokenPair::new("access-1", "refresh-1", Utc::now() + ChronoDuration::minutes(minutes))
    }

    fn guard(server: &Arc<FakeAuthServer>, tokens: Option<TokenPair>) -> Arc<TokenGuard> {
        let store: Arc<dyn SessionStore> = match tokens {
            Some(pair) => Arc::new(MemorySessionStore::with_tokens(pair)),
            None => Arc::new(MemorySessionStore::new()),
        };
        Arc::new(TokenGuard::new(store, server.clone(), REFRESH_URL))
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let server = FakeAuthServer::new();
        let guard = guard(&server, None);
        assert_eq!(guard.state().await.unwrap(), TokenState::NoToken);
        assert!(!guard.is_authenticated().await);

        guard.set_tokens(pair_expiring_in(60)).await.unwrap();
        assert_eq!(guard.state().await.unwrap(), TokenState::Valid);
        assert!(guard.is_authenticated().await);

        guard.set_tokens(pair_expiring_in(4)).await.unwrap();
        assert_eq!(guard.state().await.unwrap(), TokenState::NeedsRefresh);

        guard.logout().await.unwrap();
        assert_eq!(guard.state().await.unwrap(), TokenState::NoToken);
    }

    #[tokio::test]
    async fn test_valid_token_served_without_refresh() {
        let server = FakeAuthServer::new();
        let guard = guard(&server, Some(pair_expiring_in(30)));

        assert_eq!(guard.get_valid_token().await.unwrap().as_deref(), Some("access-1"));
        assert_eq!(server.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_token_means_none() {
        let server = FakeAuthServer::new();
        let guard = guard(&server, None);

        assert_eq!(guard.get_valid_token().await.unwrap(), None);
        assert_eq!(TokenProvider::token(guard.as_ref()).await, None);
        assert_eq!(server.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let server = FakeAuthServer::new();
        let guard = guard(&server, Some(pair_expiring_in(2)));

        let callers = (0..5).map(|_| {
            let guard = guard.clone();
            tokio::spawn(async move { guard.get_valid_token().await })
        });
        let tokens: Vec<Option<String>> = futures::future::join_all(callers)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(server.refresh_calls(), 1);
        assert!(tokens.iter().all(|t| t.as_deref() == Some("access-2")));
        assert_eq!(guard.state().await.unwrap(), TokenState::Valid);
        assert_eq!(
            guard.store().get().await.unwrap().unwrap().refresh_token,
            "refresh-2"
        );
    }

    #[tokio::test]
    async fn test_refreshing_state_visible_during_refresh() {
        let server = FakeAuthServer::new();
        let guard = guard(&server, Some(pair_expiring_in(1)));

        let background = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.get_valid_token().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(guard.state().await.unwrap(), TokenState::Refreshing);

        background.await.unwrap().unwrap();
        assert_eq!(guard.state().await.unwrap(), TokenState::Valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_refresh_does_not_stick_in_refreshing() {
        let server = FakeAuthServer::with_refresh_delay(Duration::from_secs(5));
        let guard = guard(&server, Some(pair_expiring_in(1)));

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), guard.get_valid_token()).await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(server.refresh_calls(), 1);
        assert_eq!(guard.state().await.unwrap(), TokenState::NeedsRefresh);
        assert_eq!(
            guard.store().get().await.unwrap().unwrap().access_token,
            "access-1"
        );

        // The lock was released as well, so the next caller refreshes normally
        assert_eq!(guard.get_valid_token().await.unwrap().as_deref(), Some("access-2"));
        assert_eq!(server.refresh_calls(), 2);
        assert_eq!(guard.state().await.unwrap(), TokenState::Valid);
    }

    #[tokio::test]
    async fn test_refresh_failure_invalidates_session() {
        let server = FakeAuthServer::new();
        server.respond_to_refresh(200, json!({"success": false, "error": "Invalid refresh token"}));
        let guard = guard(&server, Some(pair_expiring_in(1)));

        let err = guard.get_valid_token().await.unwrap_err();
        assert!(matches!(err, SessionError::RefreshRejected(ref m) if m == "Invalid refresh token"));

        assert_eq!(guard.state().await.unwrap(), TokenState::Invalid);
        assert!(!guard.is_authenticated().await);
        assert!(guard.store().get().await.unwrap().is_none());

        guard.logout().await.unwrap();
        assert_eq!(guard.state().await.unwrap(), TokenState::NoToken);
    }

    #[tokio::test]
    async fn test_failed_refresh_fails_all_waiters_with_one_call() {
        let server = FakeAuthServer::new();
        server.respond_to_refresh(401, json!({"error": "Unauthorized", "message": "Invalid refresh token"}));
        let guard = guard(&server, Some(pair_expiring_in(1)));

        let callers = (0..5).map(|_| {
            let guard = guard.clone();
            tokio::spawn(async move { guard.get_valid_token().await })
        });
        let results = futures::future::join_all(callers).await;

        assert_eq!(server.refresh_calls(), 1);
        assert!(results.into_iter().all(|r| r.unwrap().is_err()));
        assert_eq!(guard.state().await.unwrap(), TokenState::Invalid);
    }

    #[tokio::test]
    async fn test_unauthorized_triggers_one_refresh_and_retry() {
        let server = FakeAuthServer::new();
        server.reject("access-1");
        let guard = guard(&server, Some(pair_expiring_in(30)));

        let response = guard
            .authenticated_send(&HttpRequest::new(Method::GET, API_URL))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(server.refresh_calls(), 1);
        assert_eq!(
            *server.seen_auth.lock().unwrap(),
            vec!["Bearer access-1".to_string(), "Bearer access-2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_second_unauthorized_clears_tokens() {
        let server = FakeAuthServer::new();
        server.reject("access-1");
        server.reject("access-2");
        let guard = guard(&server, Some(pair_expiring_in(30)));

        let err = guard
            .authenticated_send(&HttpRequest::new(Method::GET, API_URL))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Unauthorized));
        assert_eq!(server.refresh_calls(), 1);
        assert_eq!(server.api_calls.load(Ordering::SeqCst), 2);
        assert!(guard.store().get().await.unwrap().is_none());
        assert!(!guard.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_send_without_session_fails_fast() {
        let server = FakeAuthServer::new();
        let guard = guard(&server, None);

        let err = guard
            .authenticated_send(&HttpRequest::new(Method::GET, API_URL))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotAuthenticated));
        assert_eq!(server.api_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_explicit_refresh_without_tokens() {
        let server = FakeAuthServer::new();
        let guard = guard(&server, None);

        assert!(matches!(guard.refresh().await, Err(SessionError::NoRefreshToken)));
        assert_eq!(server.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_fingerprint_sent_with_refresh() {
        struct CapturingRefresh {
            bodies: StdMutex<Vec<String>>,
        }

        #[async_trait]
        impl Transport for CapturingRefresh {
            async fn send(&self, request: &HttpRequest) -> carebridge_egress::Result<HttpResponse> {
                self.bodies
                    .lock()
                    .unwrap()
                    .push(request.body.clone().unwrap_or_default());
                Ok(HttpResponse {
                    status: 200,
                    headers: HashMap::new(),
                    body: rotated_body("access-2", "refresh-2").to_string(),
                })
            }
        }

        let transport = Arc::new(CapturingRefresh {
            bodies: StdMutex::new(Vec::new()),
        });
        let fingerprint = DeviceFingerprint::from_traits("ua", "en-US", 1440, 900, "");
        let guard = TokenGuard::new(
            Arc::new(MemorySessionStore::with_tokens(pair_expiring_in(1))),
            transport.clone(),
            REFRESH_URL,
        )
        .with_config(GuardConfig {
            device_fingerprint: Some(fingerprint.clone()),
            ..GuardConfig::default()
        });

        guard.get_valid_token().await.unwrap();

        let body: serde_json::Value =
            serde_json::from_str(&transport.bodies.lock().unwrap()[0]).unwrap();
        assert_eq!(body["refreshToken"], "refresh-1");
        assert_eq!(body["deviceFingerprint"], fingerprint.as_str());
    }
}
