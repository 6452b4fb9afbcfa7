//! Error types for the Ratekeeper service.

use thiserror::Error;

/// Main error type for Ratekeeper operations.
#[derive(Error, Debug)]
pub enum RatekeeperError {
    /// Unknown algorithm kind requested at configuration time
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Limiter parameters that cannot produce a meaningful limiter
    #[error("Invalid limiter configuration: {0}")]
    InvalidConfig(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for RatekeeperError {
    fn from(err: config::ConfigError) -> Self {
        RatekeeperError::Config(err.to_string())
    }
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RatekeeperError>;
