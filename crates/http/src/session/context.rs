//! Consumer-facing session state
//!
//! [`SessionContext`] is what the rest of the console talks to: it knows who is
//! logged in, runs login and logout, and follows the gateway's session events
//! so a forced logout anywhere shows up here.

use super::claims::{SessionDecoder, SessionIdentity};
use super::events::SessionEvent;
use crate::client::{ClientError, Gateway};
use crate::types::Credentials;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Snapshot of the session as the UI sees it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<SessionIdentity>,
    /// True only while a login, logout, refresh or validation is in flight
    pub loading: bool,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Permission check for UI gating; anonymous sessions have none
    pub fn has_permission(&self, permission: &str) -> bool {
        self.user
            .as_ref()
            .is_some_and(|u| u.has_permission(permission))
    }
}

/// Login/logout entry point and holder of [`AuthState`]
#[derive(Clone)]
pub struct SessionContext {
    gateway: Gateway,
    state: Arc<watch::Sender<AuthState>>,
}

impl SessionContext {
    pub fn new(gateway: Gateway) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            gateway,
            state: Arc::new(state),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Current state
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Current user, if any
    pub fn user(&self) -> Option<SessionIdentity> {
        self.state.borrow().user.clone()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Restore the user from stored tokens without a network round-trip.
    ///
    /// The result is provisional: the next protected request may still find
    /// the session dead and expire it.
    pub fn hydrate(&self) -> Option<SessionIdentity> {
        let identity = self
            .gateway
            .store()
            .access_token()
            .filter(|token| !SessionDecoder::is_expired(token))
            .and_then(|token| SessionDecoder::decode(&token));

        debug!(hydrated = identity.is_some(), "Hydrated session from store");
        self.state.send_modify(|s| s.user.clone_from(&identity));
        identity
    }

    /// Log in and make the returned tokens the active session.
    ///
    /// Returns the decoded identity. Servers that issue opaque tokens yield a
    /// successful login with no identity.
    pub async fn login(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<SessionIdentity>, ClientError> {
        self.set_loading(true);
        let result = self.gateway.authenticate(credentials).await;

        match result {
            Ok(tokens) => {
                self.gateway.store().set_tokens(&tokens);
                let identity = SessionDecoder::decode(&tokens.access_token);
                if identity.is_none() {
                    warn!("Access token carries no readable identity claims");
                }
                info!(username = %credentials.username, "Logged in");
                self.state.send_replace(AuthState {
                    user: identity.clone(),
                    loading: false,
                });
                Ok(identity)
            }
            Err(e) => {
                warn!(username = %credentials.username, error = %e, "Login failed");
                self.state.send_replace(AuthState::default());
                Err(e)
            }
        }
    }

    /// End the session. Always succeeds locally; the server call is best-effort.
    pub async fn logout(&self) {
        self.set_loading(true);

        if let Err(e) = self.gateway.revoke().await {
            debug!(error = %e, "Server logout failed, clearing session locally");
        }
        self.gateway.refresher().end_session();

        info!("Logged out");
        self.state.send_replace(AuthState::default());
    }

    /// Refresh the session now, updating the user on success
    pub async fn refresh(&self) -> bool {
        self.set_loading(true);
        let refreshed = self.gateway.refresher().refresh().await;
        self.sync_after_refresh(refreshed);
        refreshed
    }

    /// Check that the session is still usable, refreshing it if needed.
    ///
    /// An access token past its local expiry goes straight to refresh. A live
    /// one is confirmed with the server; a rejection or a failed call falls
    /// back to refresh as well.
    pub async fn validate(&self) -> bool {
        let Some(token) = self.gateway.store().access_token() else {
            return false;
        };
        if SessionDecoder::is_expired(&token) {
            debug!("Access token expired locally");
            return self.refresh().await;
        }

        match self.gateway.check_token().await {
            Ok(true) => true,
            Ok(false) => self.refresh().await,
            Err(e) => {
                debug!(error = %e, "Token validation call failed");
                self.refresh().await
            }
        }
    }

    /// Fold a session event into the state
    pub fn apply(&self, event: &SessionEvent) {
        match event {
            // Late news from an exchange that lost a race with logout.
            SessionEvent::Refreshed(Some(_)) if self.gateway.store().access_token().is_none() => {
                debug!("Ignoring refresh for a session that has ended");
            }
            SessionEvent::Refreshed(Some(identity)) => {
                self.state.send_replace(AuthState {
                    user: Some(identity.clone()),
                    loading: false,
                });
            }
            // Opaque token: the user did not change.
            SessionEvent::Refreshed(None) => self.set_loading(false),
            SessionEvent::Expired => {
                self.state.send_replace(AuthState::default());
            }
            SessionEvent::AccessDenied { path } => {
                debug!(path, "Access denied, session unchanged");
            }
        }
    }

    /// Follow the gateway's session events until the channel closes
    pub async fn listen(&self) {
        self.follow(self.gateway.events().subscribe()).await;
    }

    /// [`Self::listen`] on a receiver the caller already subscribed
    pub async fn follow(&self, mut events: broadcast::Receiver<SessionEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.apply(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Session events dropped, resyncing from store");
                    self.hydrate();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn sync_after_refresh(&self, refreshed: bool) {
        let token = self.gateway.store().access_token();
        if !refreshed {
            if token.is_none() {
                self.state.send_replace(AuthState::default());
            } else {
                self.set_loading(false);
            }
            return;
        }
        let identity = token.and_then(|token| SessionDecoder::decode(&token));
        self.state.send_modify(|s| {
            if identity.is_some() {
                s.user = identity;
            }
            s.loading = false;
        });
    }

    fn set_loading(&self, loading: bool) {
        self.state.send_if_modified(|s| {
            let changed = s.loading != loading;
            s.loading = loading;
            changed
        });
    }
}
