//! Identity service endpoints
//!
//! All four auth routes hang off one configurable base URL. A base with a
//! path prefix (`https://host/portal/`) keeps its prefix.

use url::Url;

use crate::error::{Error, Result};

pub const LOGIN_PATH: &str = "api/auth/login";
pub const LOGOUT_PATH: &str = "api/auth/logout";
pub const PROFILE_PATH: &str = "api/auth/profile";
pub const REFRESH_PATH: &str = "api/auth/refresh";

/// Message used when a failed login carries no server message.
pub const DEFAULT_LOGIN_FAILURE: &str = "Login failed";

/// Resolved endpoint URLs.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub login: Url,
    pub logout: Url,
    pub profile: Url,
    pub refresh: Url,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid identity base url {base_url}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "identity base url must be http(s), got: {base_url}"
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let join = |path: &str| {
            base.join(path)
                .map_err(|e| Error::Config(format!("joining {path} onto {base}: {e}")))
        };

        Ok(Self {
            login: join(LOGIN_PATH)?,
            logout: join(LOGOUT_PATH)?,
            profile: join(PROFILE_PATH)?,
            refresh: join(REFRESH_PATH)?,
        })
    }
}
