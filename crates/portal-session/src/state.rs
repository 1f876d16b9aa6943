//! Session state published to the UI

use portal_auth::{Role, Session, User};

/// Canonical authentication state of one tab.
///
/// `Initializing` only exists before the first hydration completes. Later
/// re-hydrations (cross-tab sync, superseded refreshes) replace the state in
/// one step and do not pass through `Initializing` again.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Initializing,
    Unauthenticated,
    Authenticated(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    /// Whether hydration has finished.
    pub fn is_settled(&self) -> bool {
        !matches!(self, SessionState::Initializing)
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.session().map(|s| s.role)
    }

    pub fn user(&self) -> Option<&User> {
        self.session().map(|s| &s.user)
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated(_) => "authenticated",
        }
    }
}
