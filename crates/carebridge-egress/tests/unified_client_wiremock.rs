//! Integration tests for the unified client over a real reqwest transport
//!
//! wiremock stands in for the Zoho proxy, Catalyst functions and the audit
//! log endpoint.

use carebridge_audit::{AuditEmitter, HttpAuditSink};
use carebridge_core::AuditContext;
use carebridge_egress::{
    ApiRequestOptions, BackoffConfig, HttpClientConfig, StaticTokenProvider, UnifiedApiClient,
    UnifiedClientConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, header_exists, method, path},
};

fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

fn client_for(server: &MockServer) -> UnifiedApiClient {
    let config = UnifiedClientConfig {
        base_url: format!("{}/api", server.uri()),
        ..UnifiedClientConfig::default()
    };
    UnifiedApiClient::from_http_config(config, &HttpClientConfig::default())
        .unwrap()
        .with_backoff(fast_backoff())
}

#[tokio::test]
async fn test_zoho_request_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/zoho/crm/v2/Leads"))
        .and(header("authorization", "Bearer service-token"))
        .and(header("content-type", "application/json"))
        .and(header_exists("x-request-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "1001", "Last_Name": "Lovelace"}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server)
        .with_token_provider(Arc::new(StaticTokenProvider::new("service-token")));

    let response = client
        .zoho_request("/crm/v2/Leads", ApiRequestOptions::get(""))
        .await;

    assert!(response.is_success());
    assert_eq!(response.status, Some(200));
    assert_eq!(
        response.envelope.data.unwrap()["data"][0]["Last_Name"],
        "Lovelace"
    );
    assert_eq!(
        response.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
}

#[tokio::test]
async fn test_catalyst_request_posts_json() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/catalyst/functions/appointment-sync"))
        .and(body_json(json!({"appointmentId": "a-77"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"synced": true})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let response = client
        .catalyst_request(
            "appointment-sync",
            json!({"appointmentId": "a-77"}),
            ApiRequestOptions::get(""),
        )
        .await;

    assert!(response.is_success());
    assert_eq!(response.status, Some(201));
    assert_eq!(response.envelope.data, Some(json!({"synced": true})));
}

#[tokio::test]
async fn test_fails_twice_then_succeeds() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/patients/42"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/patients/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let response = client.request(ApiRequestOptions::get("/patients/42")).await;

    assert!(response.is_success());
    assert_eq!(response.attempts, 3);
    assert_eq!(response.envelope.data, Some(json!({"id": 42})));
}

#[tokio::test]
async fn test_plain_text_body_is_kept_raw() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&mock_server)
        .await;

    let response = client_for(&mock_server)
        .request(ApiRequestOptions::get("/health"))
        .await;

    assert_eq!(response.envelope.data, Some(json!("OK")));
}

#[tokio::test]
async fn test_exhausted_retries_return_failure_envelope() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/leads"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"message": "Email invalid"})))
        .expect(2)
        .mount(&mock_server)
        .await;

    let response = client_for(&mock_server)
        .request(ApiRequestOptions::post("/leads", json!({"email": "nope"})).retries(2))
        .await;

    assert!(!response.is_success());
    assert_eq!(response.status, Some(422));
    let error = response.envelope.error.unwrap();
    assert_eq!(error.code, "VAL_001");
    assert_eq!(error.details.unwrap()["body"]["message"], "Email invalid");
}

#[tokio::test]
async fn test_attempt_timeout_maps_to_api_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&mock_server)
        .await;

    let response = client_for(&mock_server)
        .request(ApiRequestOptions::get("/slow").timeout_ms(50).retries(1))
        .await;

    assert!(!response.is_success());
    assert_eq!(response.status, None);
    let error = response.envelope.error.unwrap();
    assert_eq!(error.code, "API_001");
    assert_eq!(error.message, "Request timeout after 50ms");
}

#[tokio::test]
async fn test_audit_events_reach_log_endpoint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/records/7"))
        .and(header("x-user-id", "clinician-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7})))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/audit"))
        .respond_with(ResponseTemplate::new(202))
        .expect(2)
        .mount(&mock_server)
        .await;

    let sink = HttpAuditSink::new(
        &format!("{}/audit", mock_server.uri()),
        Duration::from_secs(2),
    )
    .unwrap();
    let emitter = Arc::new(AuditEmitter::new(vec![Arc::new(sink)]));
    let client = client_for(&mock_server).with_audit(emitter.clone());

    let response = client
        .request(
            ApiRequestOptions::get("/records/7")
                .with_audit(AuditContext::new("RECORD_VIEW", "/records/7").with_user_id("clinician-3")),
        )
        .await;
    assert!(response.is_success());

    drop(client);
    let emitter = Arc::try_unwrap(emitter).ok().expect("client released the emitter");
    emitter.shutdown().await.unwrap();

    let audit_posts: Vec<serde_json::Value> = mock_server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/audit")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();

    let actions: Vec<&str> = audit_posts
        .iter()
        .map(|event| event["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["RECORD_VIEW_REQUEST", "RECORD_VIEW_RESPONSE"]);
    assert_eq!(audit_posts[1]["result"], "success");
    assert_eq!(audit_posts[1]["data"]["status"], 200);
}
