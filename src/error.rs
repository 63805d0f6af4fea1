//! Error types for the Stylecard service.

use thiserror::Error;

/// Main error type for Stylecard operations.
#[derive(Error, Debug)]
pub enum StylecardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client construction errors
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for StylecardError {
    fn from(err: config::ConfigError) -> Self {
        StylecardError::Config(err.to_string())
    }
}

/// Result type alias for Stylecard operations.
pub type Result<T> = std::result::Result<T, StylecardError>;
