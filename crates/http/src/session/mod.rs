//! Session state: token storage, claim decoding, events and the user-facing context

pub mod claims;
pub mod context;
pub mod events;
pub mod store;

pub use claims::{SessionDecoder, SessionIdentity};
pub use context::{AuthState, SessionContext};
pub use events::{SessionEvent, SessionEvents};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
