//! Common error types for Quickmatch components.

use thiserror::Error;

/// Common errors that can occur across Quickmatch components
#[derive(Error, Debug)]
pub enum QuickmatchError {
    /// Network transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Server id outside the nonzero 63-bit range
    #[error("Invalid server id: {0}")]
    InvalidServerId(u64),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QuickmatchError {
    fn from(err: serde_json::Error) -> Self {
        QuickmatchError::Serialization(err.to_string())
    }
}

/// Result type alias using `QuickmatchError`
pub type Result<T> = std::result::Result<T, QuickmatchError>;
