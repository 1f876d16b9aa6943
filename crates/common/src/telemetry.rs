//! Tracing bootstrap for applications embedding the session core
//!
//! Library crates only emit `tracing` events. The embedding UI shell calls
//! [`init_tracing`] once at startup to install a JSON subscriber.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Env var checked before `RUST_LOG` for the log filter.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Build the filter from LOG_LEVEL, then RUST_LOG, defaulting to `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global JSON subscriber.
///
/// Fails if a global subscriber is already set, so calling twice is an error
/// rather than a panic.
pub fn init_tracing() -> crate::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| crate::Error::Telemetry(e.to_string()))
}
