//! Error types for Gatekeeper.
//!
//! Admission checks never fail; these cover setup only.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration could not be loaded or deserialized
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
