//! Integration tests for the token guard against a mocked refresh endpoint

use carebridge_core::TokenPair;
use carebridge_egress::{
    ApiRequestOptions, HttpClientConfig, HttpRequest, ReqwestTransport, Transport,
    UnifiedApiClient, UnifiedClientConfig,
};
use carebridge_session::{
    FileSessionStore, MemorySessionStore, SessionError, SessionStore, TokenGuard, TokenState,
};
use chrono::{Duration, Utc};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn transport() -> Arc<dyn Transport> {
    Arc::new(ReqwestTransport::new(&HttpClientConfig::default()).unwrap())
}

fn expiring_pair(minutes: i64) -> TokenPair {
    TokenPair::new("access-old", "refresh-old", Utc::now() + Duration::minutes(minutes))
}

fn rotated() -> serde_json::Value {
    json!({
        "success": true,
        "message": "Token refreshed and rotated",
        "data": {
            "accessToken": "access-new",
            "refreshToken": "refresh-new",
            "expiresAt": (Utc::now() + Duration::minutes(15)).to_rfc3339(),
        }
    })
}

async fn refresh_url(server: &MockServer) -> String {
    format!("{}/api/auth/refresh", server.uri())
}

#[tokio::test]
async fn test_single_flight_refresh_over_http() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_partial_json(json!({"refreshToken": "refresh-old"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(rotated())
                .set_delay(std::time::Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let guard = Arc::new(TokenGuard::new(
        Arc::new(MemorySessionStore::with_tokens(expiring_pair(2))),
        transport(),
        refresh_url(&mock_server).await,
    ));

    let callers: Vec<_> = (0..5)
        .map(|_| {
            let guard = guard.clone();
            tokio::spawn(async move { guard.get_valid_token().await })
        })
        .collect();

    for caller in callers {
        let token = caller.await.unwrap().unwrap();
        assert_eq!(token.as_deref(), Some("access-new"));
    }
    assert_eq!(guard.state().await.unwrap(), TokenState::Valid);
}

#[tokio::test]
async fn test_rejected_refresh_invalidates() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "error": "Invalid refresh token"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let guard = TokenGuard::new(
        Arc::new(MemorySessionStore::with_tokens(expiring_pair(1))),
        transport(),
        refresh_url(&mock_server).await,
    );

    assert!(matches!(
        guard.get_valid_token().await,
        Err(SessionError::RefreshRejected(_))
    ));
    assert_eq!(guard.state().await.unwrap(), TokenState::Invalid);
    assert!(!guard.is_authenticated().await);
    assert!(guard.store().get().await.unwrap().is_none());
}

#[tokio::test]
async fn test_authenticated_send_retries_after_401() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rotated()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/appointments"))
        .and(header("authorization", "Bearer access-old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/appointments"))
        .and(header("authorization", "Bearer access-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "apt-1"}])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let guard = TokenGuard::new(
        Arc::new(MemorySessionStore::with_tokens(expiring_pair(60))),
        transport(),
        refresh_url(&mock_server).await,
    );

    let response = guard
        .authenticated_send(&HttpRequest::new(
            Method::GET,
            format!("{}/api/appointments", mock_server.uri()),
        ))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert!(response.body.contains("apt-1"));
}

#[tokio::test]
async fn test_guard_as_unified_client_token_provider() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let session_path = dir.path().join("session.json");

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rotated()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/zoho/crm/v2/Contacts"))
        .and(header("authorization", "Bearer access-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = Arc::new(FileSessionStore::new(&session_path).unwrap());
    store.set(expiring_pair(3)).await.unwrap();

    let guard = Arc::new(TokenGuard::new(
        store,
        transport(),
        refresh_url(&mock_server).await,
    ));
    let client = UnifiedApiClient::new(
        UnifiedClientConfig {
            base_url: format!("{}/api", mock_server.uri()),
            ..UnifiedClientConfig::default()
        },
        transport(),
    )
    .with_token_provider(guard);

    let response = client
        .zoho_request("/crm/v2/Contacts", ApiRequestOptions::get(""))
        .await;
    assert!(response.is_success());

    let persisted = FileSessionStore::new(&session_path)
        .unwrap()
        .get()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.access_token, "access-new");
    assert_eq!(persisted.refresh_token, "refresh-new");
}
