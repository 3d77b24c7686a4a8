//! Integration tests for the authenticated request gateway

mod common;

use common::{dead_endpoint, gateway_with_store, pair, request_count, token_reply};
use portal_console_http::client::{MultipartField, RequestOptions};
use portal_console_http::{ClientError, Gateway, MemoryTokenStore, SessionEvent, TokenStore};
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, header_exists, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_protected_call_without_token_never_hits_network() {
    let mock_server = MockServer::start().await;
    let (gateway, store) = gateway_with_store(&mock_server, None);
    let mut events = gateway.events().subscribe();

    let result = gateway
        .request("api/openvpn/users", RequestOptions::get())
        .await;

    assert!(matches!(result, Err(ClientError::SessionExpired)));
    assert_eq!(request_count(&mock_server).await, 0);
    assert!(store.refresh_token().is_none());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Expired);
}

#[tokio::test]
async fn test_forbidden_is_access_denied_and_keeps_tokens() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/portal/users/42"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (gateway, store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));

    let result = gateway
        .request("api/portal/users/42", RequestOptions::delete())
        .await;

    assert!(matches!(result, Err(ClientError::AccessDenied)));
    assert_eq!(store.access_token().as_deref(), Some("A1"));
    assert_eq!(store.refresh_token().as_deref(), Some("R1"));
    // No refresh attempted
    assert_eq!(request_count(&mock_server).await, 1);
}

#[tokio::test]
async fn test_unauthorized_refreshes_and_retries_with_new_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/openvpn/users"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refreshToken": "R1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_reply("A2", "R2")))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/openvpn/users"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": {"data": {"users": [], "total": 0}}})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let (gateway, store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));

    let response = gateway
        .request("api/openvpn/users", RequestOptions::get())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // First call, the refresh, and one retry
    assert_eq!(request_count(&mock_server).await, 3);
    assert_eq!(store.access_token().as_deref(), Some("A2"));
    assert_eq!(store.refresh_token().as_deref(), Some("R2"));
}

#[tokio::test]
async fn test_refresh_rejected_clears_store() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/openvpn/groups"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (gateway, store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));
    let mut events = gateway.events().subscribe();

    let result = gateway
        .request("api/openvpn/groups", RequestOptions::get())
        .await;

    assert!(matches!(result, Err(ClientError::SessionExpired)));
    assert!(store.access_token().is_none());
    assert!(store.refresh_token().is_none());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Expired);
}

#[tokio::test]
async fn test_retry_happens_at_most_once() {
    let mock_server = MockServer::start().await;

    // Every attempt at the resource is rejected
    Mock::given(method("GET"))
        .and(path("/api/portal/audit/logs"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_reply("A2", "R2")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (gateway, _store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));

    let response = gateway
        .request("api/portal/audit/logs", RequestOptions::get())
        .await
        .unwrap();

    // The second 401 is handed back untouched
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(request_count(&mock_server).await, 3);
}

#[tokio::test]
async fn test_public_paths_do_not_refresh() {
    let mock_server = MockServer::start().await;

    // The stored token still rides along on a public call
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "bad credentials"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let (gateway, store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));

    let response = gateway
        .request(
            "auth/login",
            RequestOptions::post()
                .json(&json!({"username": "admin", "password": "wrong"}))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(request_count(&mock_server).await, 1);
    assert_eq!(store.access_token().as_deref(), Some("A1"));
}

#[tokio::test]
async fn test_public_path_forbidden_is_returned_as_is() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (gateway, store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));
    let mut events = gateway.events().subscribe();

    let response = gateway
        .request("auth/login", RequestOptions::post())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(events.try_recv().is_err());
    assert_eq!(store.access_token().as_deref(), Some("A1"));
}

#[tokio::test]
async fn test_public_path_without_token_is_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_reply("A1", "R1")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (gateway, _store) = gateway_with_store(&mock_server, None);
    let response = gateway
        .request("/auth/login", RequestOptions::post())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let received = mock_server.received_requests().await.unwrap();
    assert!(received[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_soft_refresh_failure_keeps_tokens() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/openvpn/users"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (gateway, store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));

    let result = gateway
        .request("api/openvpn/users", RequestOptions::get())
        .await;

    assert!(matches!(result, Err(ClientError::SessionExpired)));
    assert_eq!(store.access_token().as_deref(), Some("A1"));
    assert_eq!(store.refresh_token().as_deref(), Some("R1"));
}

#[tokio::test]
async fn test_server_error_during_refresh_clears_tokens() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/openvpn/users"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock_server)
        .await;

    let (gateway, store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));

    let result = gateway
        .request("api/openvpn/users", RequestOptions::get())
        .await;

    assert!(matches!(result, Err(ClientError::SessionExpired)));
    assert!(store.access_token().is_none());
}

#[tokio::test]
async fn test_malformed_refresh_payload_clears_tokens() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (gateway, store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));

    assert!(!gateway.refresher().refresh().await);
    assert!(store.refresh_token().is_none());
}

#[tokio::test]
async fn test_refresh_payload_without_access_token_clears_tokens() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": {"data": {}}})))
        .mount(&mock_server)
        .await;

    let (gateway, store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));

    assert!(!gateway.refresher().refresh().await);
    assert!(store.access_token().is_none());
}

#[tokio::test]
async fn test_refresh_without_refresh_token_skips_network() {
    let mock_server = MockServer::start().await;
    let (gateway, store) = gateway_with_store(&mock_server, None);

    assert!(!gateway.refresher().refresh().await);
    assert_eq!(request_count(&mock_server).await, 0);
    assert!(store.access_token().is_none());
}

#[tokio::test]
async fn test_refresh_keeps_refresh_token_when_not_rotated() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "A2"})))
        .mount(&mock_server)
        .await;

    let (gateway, store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));

    assert!(gateway.refresher().refresh().await);
    assert_eq!(store.access_token().as_deref(), Some("A2"));
    assert_eq!(store.refresh_token().as_deref(), Some("R1"));
}

#[tokio::test]
async fn test_transport_error_during_refresh_clears_tokens() {
    let store = Arc::new(MemoryTokenStore::with_tokens(pair("A1", "R1")));
    let gateway = Gateway::builder()
        .base_url(dead_endpoint())
        .store(store.clone())
        .build()
        .unwrap();

    assert!(!gateway.refresher().refresh().await);
    assert!(store.access_token().is_none());
}

#[tokio::test]
async fn test_transport_error_on_protected_call_keeps_tokens() {
    let store = Arc::new(MemoryTokenStore::with_tokens(pair("A1", "R1")));
    let gateway = Gateway::builder()
        .base_url(dead_endpoint())
        .store(store.clone())
        .build()
        .unwrap();

    let result = gateway
        .request("api/openvpn/users", RequestOptions::get())
        .await;

    assert!(matches!(result, Err(ClientError::Request(_))));
    assert_eq!(store.access_token().as_deref(), Some("A1"));
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_exchange() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_reply("A2", "R2"))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(2)
        .mount(&mock_server)
        .await;

    let (gateway, store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));

    let (users, groups) = tokio::join!(
        gateway.request("api/openvpn/users", RequestOptions::get()),
        gateway.request("api/openvpn/groups", RequestOptions::get()),
    );

    assert_eq!(users.unwrap().status(), StatusCode::OK);
    assert_eq!(groups.unwrap().status(), StatusCode::OK);
    assert_eq!(gateway.refresher().completed(), 1);
    assert_eq!(store.refresh_token().as_deref(), Some("R2"));
}

#[tokio::test]
async fn test_uncoordinated_refreshes_each_hit_the_server() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_reply("A2", "R2"))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryTokenStore::with_tokens(pair("A1", "R1")));
    let gateway = Gateway::builder()
        .base_url(mock_server.uri())
        .store(store.clone())
        .single_flight(false)
        .build()
        .unwrap();

    let (users, groups) = tokio::join!(
        gateway.request("api/openvpn/users", RequestOptions::get()),
        gateway.request("api/openvpn/groups", RequestOptions::get()),
    );

    assert!(users.is_ok());
    assert!(groups.is_ok());
    assert_eq!(store.access_token().as_deref(), Some("A2"));
}

#[tokio::test]
async fn test_json_content_type_and_default_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/portal/groups"))
        .and(header("content-type", "application/json"))
        .and(header("ngrok-skip-browser-warning", "1"))
        .and(header("authorization", "Bearer A1"))
        .and(body_json(json!({"name": "ops"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"success": {"data": {"id": 7}}})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryTokenStore::with_tokens(pair("A1", "R1")));
    let gateway = Gateway::builder()
        .base_url(mock_server.uri())
        .default_header("ngrok-skip-browser-warning", "1")
        .store(store)
        .build()
        .unwrap();

    let created: Value = gateway
        .send_json(reqwest::Method::POST, "api/portal/groups", &json!({"name": "ops"}))
        .await
        .unwrap();
    assert_eq!(created, json!({"id": 7}));
}

#[tokio::test]
async fn test_multipart_keeps_its_boundary() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/openvpn/users/bulk/import"))
        .and(header_regex("content-type", "^multipart/form-data; boundary="))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"imported": 2}})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (gateway, _store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));

    let options = RequestOptions::post()
        .header(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        )
        .multipart(vec![
            MultipartField::file("file", "users.csv", b"username\nalice\nbob\n".to_vec())
                .with_mime("text/csv"),
            MultipartField::text("format", "csv"),
        ]);

    let result: Value = gateway
        .execute("api/openvpn/users/bulk/import", options)
        .await
        .unwrap();
    assert_eq!(result, json!({"imported": 2}));
}

#[tokio::test]
async fn test_typed_helpers_surface_api_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/portal/users/99"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": {"message": "user not found"}})),
        )
        .mount(&mock_server)
        .await;

    let (gateway, _store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));

    let result: Result<Value, _> = gateway.get_json("api/portal/users/99").await;
    match result {
        Err(ClientError::Api { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "user not found");
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_accepts_empty_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/openvpn/groups/ops"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (gateway, _store) = gateway_with_store(&mock_server, Some(pair("A1", "R1")));
    gateway.delete("api/openvpn/groups/ops").await.unwrap();
}

#[tokio::test]
async fn test_path_prefix_is_applied() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/proxy/api/openvpn/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"clients": 0}})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryTokenStore::with_tokens(pair("A1", "R1")));
    let gateway = Gateway::builder()
        .base_url(mock_server.uri())
        .path_prefix("proxy")
        .store(store)
        .build()
        .unwrap();

    let status: Value = gateway.get_json("api/openvpn/status").await.unwrap();
    assert_eq!(status["clients"], 0);
}
