//! Refresh token exchange
//!
//! Outcome policy for `auth/refresh`:
//!
//! | Result | Tokens | Returns |
//! |---|---|---|
//! | 2xx with an access token | replaced | `true` |
//! | 2xx with an unreadable or empty payload | cleared | `false` |
//! | 401 or any 5xx | cleared | `false` |
//! | other non-2xx | kept | `false` |
//! | transport error | cleared | `false` |
//!
//! Concurrent callers share a single exchange when single-flight is enabled:
//! whoever arrives while an exchange is running waits for it and takes its
//! result instead of spending the refresh token a second time.
//!
//! Every cleared session bumps an epoch. An exchange that finishes after the
//! epoch moved on (a logout or forced expiry in the meantime) discards its
//! tokens instead of resurrecting the session.

use super::Transport;
use super::request::{REFRESH_PATH, RequestBody, RequestOptions};
use crate::envelope::Envelope;
use crate::session::claims::SessionDecoder;
use crate::session::events::{SessionEvent, SessionEvents};
use crate::session::store::TokenStore;
use crate::types::{TokenPair, TokenResponse};
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex as SyncMutex};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Exchanges the refresh token for a new pair and applies the outcome
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<Transport>,
    store: Arc<dyn TokenStore>,
    events: SessionEvents,
    single_flight: bool,
    /// Number of completed exchanges
    generation: AtomicU64,
    /// Held for the duration of an exchange; stores its outcome
    flight: Mutex<bool>,
    /// Bumped whenever the session is cleared; guards token commits
    epoch: SyncMutex<u64>,
}

enum Failure {
    /// Session is unrecoverable; clear the store
    Fatal(&'static str),
    /// Ambiguous; keep tokens so a later attempt can succeed
    Soft(StatusCode),
}

impl RefreshCoordinator {
    pub(crate) fn new(
        transport: Arc<Transport>,
        store: Arc<dyn TokenStore>,
        events: SessionEvents,
        single_flight: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                events,
                single_flight,
                generation: AtomicU64::new(0),
                flight: Mutex::new(false),
                epoch: SyncMutex::new(0),
            }),
        }
    }

    /// Number of refresh exchanges that have completed
    pub fn completed(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Clear the store and retire any exchange still in flight.
    ///
    /// Tokens obtained by an exchange that started before this call are
    /// thrown away when it completes.
    pub fn end_session(&self) {
        self.inner.end_session();
    }

    /// Try to obtain a new token pair; `false` means the session is unusable
    pub async fn refresh(&self) -> bool {
        let inner = &self.inner;
        if !inner.single_flight {
            return inner.exchange().await;
        }

        let seen = inner.generation.load(Ordering::Acquire);
        let mut last_outcome = inner.flight.lock().await;
        if inner.generation.load(Ordering::Acquire) != seen {
            debug!(outcome = *last_outcome, "Joined a refresh that was already running");
            return *last_outcome;
        }

        let outcome = inner.exchange().await;
        *last_outcome = outcome;
        inner.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }
}

impl Inner {
    async fn exchange(&self) -> bool {
        let epoch = self.current_epoch();
        let Some(refresh_token) = self.store.refresh_token() else {
            info!("No refresh token, ending session");
            self.expire();
            return false;
        };

        match self.try_exchange(&refresh_token).await {
            Ok(tokens) => {
                if !self.commit(epoch, &tokens) {
                    info!("Session ended while refreshing, discarding new tokens");
                    return false;
                }
                let identity = SessionDecoder::decode(&tokens.access_token);
                info!(
                    username = identity.as_ref().map(|i| i.username.as_str()),
                    "Session refreshed"
                );
                self.events.emit(SessionEvent::Refreshed(identity));
                true
            }
            Err(Failure::Fatal(reason)) => {
                warn!(reason, "Refresh failed, ending session");
                self.expire_since(epoch);
                false
            }
            Err(Failure::Soft(status)) => {
                warn!(status = status.as_u16(), "Refresh rejected, keeping tokens");
                false
            }
        }
    }

    async fn try_exchange(&self, refresh_token: &str) -> Result<TokenPair, Failure> {
        let options = RequestOptions {
            body: RequestBody::Json(json!({ "refreshToken": refresh_token })),
            ..RequestOptions::post()
        };

        let response = self
            .transport
            .send(REFRESH_PATH, &options, None)
            .await
            .map_err(|e| {
                debug!(error = %e, "Refresh request did not complete");
                Failure::Fatal("transport error")
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status.is_server_error() {
            return Err(Failure::Fatal("refresh token rejected"));
        }
        if !status.is_success() {
            return Err(Failure::Soft(status));
        }

        let body = response
            .text()
            .await
            .map_err(|_| Failure::Fatal("unreadable response body"))?;
        let value: Value =
            serde_json::from_str(&body).map_err(|_| Failure::Fatal("response is not JSON"))?;
        let payload: TokenResponse = Envelope::normalize(value)
            .decode()
            .map_err(|_| Failure::Fatal("unexpected token payload"))?;

        // A reply without a refresh token leaves the current one in force.
        let next_refresh = payload
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| refresh_token.to_string());
        TokenPair::new(payload.access_token, next_refresh)
            .ok_or(Failure::Fatal("missing access token"))
    }

    fn current_epoch(&self) -> u64 {
        *self.epoch.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Store `tokens` unless the session was cleared since `epoch`
    fn commit(&self, epoch: u64, tokens: &TokenPair) -> bool {
        let guard = self.epoch.lock().unwrap_or_else(|p| p.into_inner());
        if *guard != epoch {
            return false;
        }
        self.store.set_tokens(tokens);
        true
    }

    fn end_session(&self) {
        let mut guard = self.epoch.lock().unwrap_or_else(|p| p.into_inner());
        *guard += 1;
        self.store.clear_tokens();
    }

    fn expire(&self) {
        self.end_session();
        self.events.emit(SessionEvent::Expired);
    }

    /// Expire the session seen at `epoch`; a newer one is left alone
    fn expire_since(&self, epoch: u64) {
        {
            let mut guard = self.epoch.lock().unwrap_or_else(|p| p.into_inner());
            if *guard != epoch {
                return;
            }
            *guard += 1;
            self.store.clear_tokens();
        }
        self.events.emit(SessionEvent::Expired);
    }
}
