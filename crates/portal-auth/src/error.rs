//! Error types for identity operations

/// Errors from gateway and storage operations.
///
/// Every gateway failure is returned as one of these; none of them is
/// allowed to reach the UI render path as a panic.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("access token expired: {0}")]
    ExpiredToken(String),

    #[error("identity service rejected request: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("corrupted local session: {0}")]
    CorruptedSession(String),

    #[error("superseded by another tab: {0}")]
    Superseded(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Text safe to show next to a login form.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidCredentials(msg) => msg.clone(),
            Error::Network(_) => {
                "Unable to reach the server. Check your connection and try again.".into()
            }
            Error::ExpiredToken(_) | Error::NotAuthenticated(_) => {
                "Your session has expired. Please sign in again.".into()
            }
            _ => "Something went wrong. Please try again.".into(),
        }
    }
}

/// Result alias for identity operations.
pub type Result<T> = std::result::Result<T, Error>;
