//! Error types for the Tripgate service.

use thiserror::Error;

/// Main error type for Tripgate operations.
#[derive(Error, Debug)]
pub enum TripgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TripgateError {
    fn from(err: config::ConfigError) -> Self {
        TripgateError::Config(err.to_string())
    }
}

/// Result type alias for Tripgate operations.
pub type Result<T> = std::result::Result<T, TripgateError>;
