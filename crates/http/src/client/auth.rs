//! Authentication API client methods

use super::request::{LOGIN_PATH, LOGOUT_PATH, VALIDATE_PATH};
use super::{ClientError, Gateway, RequestOptions, read_envelope};
use crate::types::{Credentials, TokenPair, TokenResponse};

impl Gateway {
    /// Exchange credentials for a token pair.
    ///
    /// The pair is returned, not stored; the session context decides when it
    /// becomes the active session.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<TokenPair, ClientError> {
        let options = RequestOptions::post().json(credentials)?;
        let response = self.request(LOGIN_PATH, options).await?;
        let payload: TokenResponse = read_envelope(response).await?.decode()?;

        if payload.access_token.is_empty() {
            return Err(ClientError::InvalidResponse(
                "login response has no accessToken".into(),
            ));
        }
        let refresh_token = payload.refresh_token.unwrap_or_default();
        TokenPair::new(payload.access_token, refresh_token).ok_or_else(|| {
            ClientError::InvalidResponse("login response has no usable refreshToken".into())
        })
    }

    /// Tell the server the session is over.
    ///
    /// Sent once with the current bearer token; a 401 here is reported, never
    /// answered with a refresh.
    pub async fn revoke(&self) -> Result<(), ClientError> {
        if self.store.access_token().is_none() {
            return Ok(());
        }
        let response = self.send_unmanaged(LOGOUT_PATH, &RequestOptions::post()).await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::from_status(status, &body))
        }
    }

    /// Ask the server whether the current access token is still accepted.
    ///
    /// No refresh is attempted here; the caller decides what a rejection means.
    pub async fn check_token(&self) -> Result<bool, ClientError> {
        let response = self.send_unmanaged(VALIDATE_PATH, &RequestOptions::get()).await?;
        Ok(response.status().is_success())
    }
}
