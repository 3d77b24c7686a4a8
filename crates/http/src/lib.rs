//! Authenticated API session layer for the portal admin console
//!
//! This crate owns the bearer-token lifecycle of a console session: where the
//! tokens live ([`session::store`]), what they say about the user
//! ([`session::claims`]), how every API call carries them
//! ([`client::Gateway`]), and how an expired access token is replaced
//! ([`client::RefreshCoordinator`]). [`session::SessionContext`] ties these
//! together for the UI.

#[macro_use]
extern crate tracing;

pub mod client;
pub mod envelope;
pub mod session;
pub mod types;

pub use client::{ClientError, Gateway, GatewayBuilder, RequestOptions};
pub use envelope::Envelope;
pub use session::{
    AuthState, FileTokenStore, MemoryTokenStore, SessionContext, SessionDecoder, SessionEvent,
    SessionEvents, SessionIdentity, TokenStore,
};
pub use types::{Credentials, TokenPair};

/// Result type for client operations
pub type Result<T, E = ClientError> = std::result::Result<T, E>;
