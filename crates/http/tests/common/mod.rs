//! Shared fixtures for the gateway and session integration tests

#![allow(dead_code)]

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use portal_console_http::{Gateway, MemoryTokenStore, TokenPair, TokenStore};
use serde_json::{Value, json};
use std::sync::Arc;
use wiremock::MockServer;

/// Unsigned JWT carrying the given claims
pub fn jwt(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// JWT for `username` expiring `ttl_secs` from now (negative for the past)
pub fn jwt_for(username: &str, role: &str, ttl_secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + ttl_secs;
    jwt(&json!({
        "username": username,
        "role": role,
        "sub": username,
        "iss": "system-portal",
        "exp": exp,
    }))
}

/// `{"success": {"data": {...}}}` token reply
pub fn token_reply(access: &str, refresh: &str) -> Value {
    json!({
        "success": {
            "data": { "accessToken": access, "refreshToken": refresh }
        }
    })
}

pub fn pair(access: &str, refresh: &str) -> TokenPair {
    TokenPair::new(access, refresh).expect("non-empty tokens")
}

/// Gateway against the mock server, sharing the returned store
pub fn gateway_with_store(
    server: &MockServer,
    tokens: Option<TokenPair>,
) -> (Gateway, Arc<MemoryTokenStore>) {
    let store = Arc::new(match tokens {
        Some(tokens) => MemoryTokenStore::with_tokens(tokens),
        None => MemoryTokenStore::new(),
    });
    let gateway = Gateway::builder()
        .base_url(server.uri())
        .store(store.clone() as Arc<dyn TokenStore>)
        .build()
        .expect("gateway builds");
    (gateway, store)
}

/// Number of requests the mock server has seen
pub async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or_default()
}

/// Base URL nothing listens on
pub fn dead_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}
