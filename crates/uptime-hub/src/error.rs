//! Error types for the hub

use thiserror::Error;

/// Result type for hub operations
pub type Result<T> = std::result::Result<T, HubError>;

/// Hub errors
///
/// None of these are fatal to a validator connection. The socket loop logs
/// them and keeps reading.
#[derive(Error, Debug)]
pub enum HubError {
    // ========== Protocol errors ==========
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("No pending request for callback {0}")]
    UnknownCallback(String),

    #[error("Identity mismatch: {0}")]
    IdentityMismatch(String),

    // ========== Authentication errors ==========
    #[error("Signature verification failed")]
    InvalidSignature,

    // ========== Persistence errors ==========
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),

    // ========== Resource errors ==========
    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        HubError::MalformedFrame(e.to_string())
    }
}
