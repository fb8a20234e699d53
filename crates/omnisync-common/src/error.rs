//! Error types shared across omnisync crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by shared types before any I/O happens
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CommonError {
    /// Create an invalid time window error
    pub fn invalid_window(msg: impl Into<String>) -> Self {
        Self::InvalidTimeWindow(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
