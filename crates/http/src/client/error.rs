//! Client error types

use serde_json::Value;
use thiserror::Error;

/// Longest slice of a raw error body carried into an error message
const MAX_BODY_EXCERPT: usize = 500;

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    /// No usable session: the access token is missing or the refresh was rejected
    #[error("SESSION_EXPIRED")]
    SessionExpired,

    /// Authenticated but not authorized for the requested resource
    #[error("ACCESS_DENIED")]
    AccessDenied,

    /// Network or request error
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Server error {status}: {message}")]
    Api { status: u16, message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Response parsed but did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether the caller has to send the user back to the login screen
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Whether the server refused the action for the current identity
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied)
            || matches!(self, Self::Api { status: 403, .. })
    }

    /// Build an error from a failed response status and its raw body
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        Self::Api {
            status: status.as_u16(),
            message: extract_message(status, body),
        }
    }
}

/// Pull a human readable message out of an error response body.
///
/// The upstream API is not consistent about where it puts the message, so
/// the known shapes are tried in order before falling back to the raw text.
pub fn extract_message(status: reqwest::StatusCode, body: &str) -> String {
    if status == reqwest::StatusCode::FORBIDDEN {
        return "Access Denied: You do not have permission for this action.".to_string();
    }

    if body.trim().is_empty() {
        return format!(
            "Server responded with {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        )
        .trim_end()
        .to_string();
    }

    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return excerpt(body);
    };

    let candidates = [
        parsed.pointer("/error/message"),
        parsed.pointer("/success/message"),
        parsed.get("message"),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Some(message) = candidate.as_str() {
            return message.to_string();
        }
    }

    if let Some(message) = parsed.as_str() {
        return message.to_string();
    }
    if let Some(message) = parsed.get("error").and_then(Value::as_str) {
        return message.to_string();
    }

    excerpt(body)
}

fn excerpt(body: &str) -> String {
    body.chars().take(MAX_BODY_EXCERPT).collect()
}
