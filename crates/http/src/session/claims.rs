//! Local decoding of access token claims
//!
//! Tokens are read, never verified: the server is the only party that checks
//! signatures. Decoding exists so the console can show who is logged in and
//! skip requests it already knows will bounce.

use base64::Engine as _;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Identity projected from an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub username: String,
    pub role: String,
    /// Expiry as seconds since the Unix epoch
    pub expires_at: i64,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl SessionIdentity {
    /// Whether the identity carries the named permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    username: Option<String>,
    sub: Option<String>,
    #[serde(default)]
    role: Option<String>,
    exp: Option<f64>,
    #[serde(default)]
    permissions: Vec<String>,
}

/// Stateless access token decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionDecoder;

impl SessionDecoder {
    /// Decode the identity claims, or `None` if the token is not a readable JWT
    pub fn decode(token: &str) -> Option<SessionIdentity> {
        let claims = Self::raw_claims(token)?;
        let username = claims.username.or(claims.sub)?;
        let exp = claims.exp?;
        if !exp.is_finite() {
            return None;
        }

        Some(SessionIdentity {
            username,
            role: claims.role.unwrap_or_default(),
            expires_at: exp.floor() as i64,
            permissions: claims.permissions,
        })
    }

    /// Whether the token is past its expiry; unreadable tokens count as expired
    pub fn is_expired(token: &str) -> bool {
        Self::is_expired_at(token, Utc::now().timestamp())
    }

    /// [`Self::is_expired`] against an explicit clock
    pub fn is_expired_at(token: &str, now: i64) -> bool {
        Self::decode(token).is_none_or(|identity| identity.expires_at < now)
    }

    fn raw_claims(token: &str) -> Option<RawClaims> {
        let mut segments = token.split('.');
        let (_header, payload) = (segments.next()?, segments.next()?);
        // Header and payload are mandatory; the signature may be empty.
        segments.next()?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .or_else(|_| URL_SAFE.decode(payload))
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}
