//! Wire and session types shared by the client and session modules

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access and refresh token strings, owned by the token store
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    /// Build a pair, rejecting empty tokens and tokens that cannot be sent
    /// in an HTTP header
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Option<Self> {
        let access_token = access_token.into();
        let refresh_token = refresh_token.into();
        if !is_header_safe(&access_token) || !is_header_safe(&refresh_token) {
            return None;
        }
        Some(Self {
            access_token,
            refresh_token,
        })
    }
}

fn is_header_safe(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b == b'\t' || (b >= 0x20 && b != 0x7f))
}

// Bearer strings stay out of logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Username/password submitted to `auth/login`
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Token payload returned by `auth/login` and `auth/refresh` once the
/// envelope is stripped
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}
