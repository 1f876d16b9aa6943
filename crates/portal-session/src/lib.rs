//! Session state for one browser tab
//!
//! `SessionManager` is the state machine the UI reads: it hydrates from the
//! shared profile storage, moves on login/logout/refresh results from the
//! gateway, and publishes every transition on a `watch` channel.
//! `spawn_storage_sync` keeps it in step with the other tabs.
//!
//! States:
//! - `Initializing`: before the first hydration
//! - `Unauthenticated`: nothing usable stored
//! - `Authenticated(session)`: token, user and role all present

mod error;
pub mod hydrate;
pub mod manager;
pub mod metrics;
mod state;
pub mod sync;

pub use error::{Result, SessionError};
pub use hydrate::{Hydration, classify};
pub use manager::{SessionManager, SessionOptions};
pub use state::SessionState;
pub use sync::spawn_storage_sync;
