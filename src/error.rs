//! Error types for the listener.

use crate::driver::DriverError;
use thiserror::Error;

/// Main error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenError {
    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),

    #[error("Connection failed: {0}")]
    Connect(#[source] DriverError),

    #[error("Connection lost: {0}")]
    ConnectionLost(#[source] DriverError),

    #[error("Statement failed: {0}")]
    Statement(#[source] DriverError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ListenError {
    fn from(e: serde_json::Error) -> Self {
        ListenError::Serialization(e.to_string())
    }
}

/// Result type for listener operations.
pub type Result<T> = std::result::Result<T, ListenError>;
