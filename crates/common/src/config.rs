//! Configuration types and loading
//!
//! Precedence: env vars > config file > defaults. Only `[identity]` is
//! required; every other section falls back to defaults so a minimal file
//! is a single `base_url` line.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Env var that overrides `identity.base_url`.
pub const API_URL_ENV: &str = "PORTAL_API_URL";

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    pub identity: IdentityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub guard: GuardConfig,
}

/// Remote identity service settings
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Where the browser-profile storage lives.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON file backing the profile storage. `None` keeps it in memory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            namespace: default_namespace(),
        }
    }
}

/// Session manager behavior
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Refresh the access token when its `exp` claim is this close.
    #[serde(default = "default_refresh_leeway")]
    pub refresh_leeway_secs: u64,
    #[serde(default = "default_true")]
    pub refresh_profile_on_hydrate: bool,
    /// End the session when the identity service rejects the refresh token.
    #[serde(default = "default_true")]
    pub logout_on_rejected_refresh: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_leeway_secs: default_refresh_leeway(),
            refresh_profile_on_hydrate: true,
            logout_on_rejected_refresh: true,
        }
    }
}

/// What a route guard does when the session's role is insufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyMode {
    /// Navigate to `unauthorized_path`.
    Redirect,
    /// Render an access-denied message listing actual vs. required roles.
    Inline,
}

/// Route guard destinations
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_unauthorized_path")]
    pub unauthorized_path: String,
    /// Query parameter carrying the originally requested location.
    #[serde(default = "default_return_param")]
    pub return_param: String,
    #[serde(default = "default_deny_mode")]
    pub deny_mode: DenyMode,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            login_path: default_login_path(),
            unauthorized_path: default_unauthorized_path(),
            return_param: default_return_param(),
            deny_mode: default_deny_mode(),
        }
    }
}

fn default_timeout() -> u64 {
    15
}

fn default_namespace() -> String {
    "portal".into()
}

fn default_refresh_leeway() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_login_path() -> String {
    "/login".into()
}

fn default_unauthorized_path() -> String {
    "/unauthorized".into()
}

fn default_return_param() -> String {
    "redirect".into()
}

fn default_deny_mode() -> DenyMode {
    DenyMode::Redirect
}

impl PortalConfig {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let mut config: PortalConfig = toml::from_str(contents)?;

        if let Ok(url) = std::env::var(API_URL_ENV) {
            config.identity.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        let base = &self.identity.base_url;
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(crate::Error::Config(format!(
                "base_url must start with http:// or https://, got: {base}"
            )));
        }
        Url::parse(base)
            .map_err(|e| crate::Error::Config(format!("base_url is not a valid URL: {e}")))?;

        if self.identity.timeout_secs == 0 {
            return Err(crate::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.storage.namespace.trim().is_empty() {
            return Err(crate::Error::Config(
                "storage namespace must not be empty".into(),
            ));
        }

        for (name, path) in [
            ("login_path", &self.guard.login_path),
            ("unauthorized_path", &self.guard.unauthorized_path),
        ] {
            if !path.starts_with('/') {
                return Err(crate::Error::Config(format!(
                    "{name} must be an absolute path, got: {path}"
                )));
            }
        }

        if self.guard.return_param.is_empty() {
            return Err(crate::Error::Config("return_param must not be empty".into()));
        }

        Ok(())
    }

    /// Resolve config file path from an explicit argument or CONFIG_PATH env var.
    pub fn resolve_path(explicit: Option<&str>) -> PathBuf {
        if let Some(p) = explicit {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("portal-session.toml")
    }
}
