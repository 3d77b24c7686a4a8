//! Session change notifications
//!
//! The gateway and refresh coordinator announce every change in session state
//! on a broadcast channel owned by the composition root. The session context
//! listens and keeps its user-facing state in step.

use super::claims::SessionIdentity;
use tokio::sync::broadcast;

/// Capacity of the session event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// A change in session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new token pair was stored; carries the identity if the token decodes
    Refreshed(Option<SessionIdentity>),
    /// Tokens were cleared; the user must log in again
    Expired,
    /// A protected call was refused with 403; token state is unchanged
    AccessDenied { path: String },
}

/// Sending half of the session event channel
#[derive(Debug, Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event; having no listener is fine
    pub fn emit(&self, event: SessionEvent) {
        debug!(?event, "Session event");
        let _ = self.sender.send(event);
    }

    /// Open a new receiver that sees events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}
