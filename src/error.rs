//! Error types for keyrate.

use thiserror::Error;

/// Main error type for keyrate operations.
///
/// Denial of admission is never an error; it is reported through the
/// boolean and wait-time results of [`crate::ratelimit::RateLimiter`].
#[derive(Error, Debug)]
pub enum KeyrateError {
    /// A limiter or simulation was given parameters it cannot honor
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for keyrate operations.
pub type Result<T> = std::result::Result<T, KeyrateError>;
