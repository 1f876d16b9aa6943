//! Shared building blocks for the portal session core
//!
//! Holds the pieces every other crate leans on: the redacting `Secret`
//! wrapper for tokens, the TOML configuration layer, and the tracing
//! bootstrap the embedding application calls once at startup.

pub mod config;
mod error;
mod secret;
pub mod telemetry;

pub use config::{DenyMode, GuardConfig, IdentityConfig, PortalConfig, SessionSettings, StorageConfig};
pub use error::{Error, Result};
pub use secret::Secret;
