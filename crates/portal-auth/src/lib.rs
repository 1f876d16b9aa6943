//! Identity plumbing for the portal session core
//!
//! Everything that touches credentials lives here: the browser-profile
//! token storage, the gateway to the remote identity service, and token
//! claim inspection. Nothing in this crate keeps session *state*; that is
//! `portal-session`'s job.
//!
//! Credential flow:
//! 1. UI calls `AuthGateway::login()` with the submitted credentials
//! 2. Gateway writes the new session through `TokenStore::write_session()`
//! 3. Other tabs see a `StorageEvent` from `TokenStore::subscribe()`
//! 4. `AuthGateway::refresh_token()` swaps the token pair in place
//! 5. `AuthGateway::logout()` clears every owned key, remote call or not

pub mod claims;
pub mod endpoints;
pub mod error;
pub mod gateway;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod types;

pub use endpoints::Endpoints;
pub use error::{Error, Result};
pub use gateway::AuthGateway;
pub use store::{
    ProfileStorage, StorageEvent, StorageKey, StorageListener, StoredSnapshot, TabId, TokenStore,
    WriteOutcome,
};
pub use types::{Credentials, Role, Session, TokenPair, User, UserId};
