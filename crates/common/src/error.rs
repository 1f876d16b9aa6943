//! Common error types

use thiserror::Error;

/// Errors raised while loading configuration or bootstrapping telemetry.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_includes_context() {
        let err = Error::Config("identity.base_url missing".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: identity.base_url missing"
        );
    }

    #[test]
    fn io_error_converts_with_prefix() {
        let err: Error =
            std::io::Error::new(std::io::ErrorKind::NotFound, "profile.json").into();
        assert!(err.to_string().starts_with("I/O error:"), "got: {err}");
    }

    #[test]
    fn toml_error_converts() {
        let parse_err = toml::from_str::<toml::Table>("[[[").unwrap_err();
        let err: Error = parse_err.into();
        let debug = format!("{err:?}");
        assert!(debug.contains("Toml"), "Debug should include variant, got: {debug}");
    }
}
