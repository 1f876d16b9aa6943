//! Error types for session operations

/// Errors surfaced by [`SessionManager`](crate::SessionManager).
///
/// Most manager operations absorb gateway failures and settle on a state;
/// only `login` reports them, since the login form has to show something.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a login is already in progress")]
    Busy,

    #[error(transparent)]
    Auth(#[from] portal_auth::Error),
}

impl SessionError {
    /// Text safe to show next to a login form.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Busy => "Signing in, please wait.".into(),
            SessionError::Auth(e) => e.user_message(),
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
