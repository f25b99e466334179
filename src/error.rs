//! Error types for feed-pinner

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PinError {
    /// Opening a feed or waiting for it to become ready failed. Retryable,
    /// and scoped to the one key.
    #[error("Network unavailable for {key}: {reason}")]
    NetworkUnavailable { key: String, reason: String },

    /// A second handle was registered for a key that already has one.
    /// Only reachable through a serialisation bug in the pin manager.
    #[error("Duplicate subscription for {0}")]
    DuplicateSubscription(String),

    #[error("Not pinned: {0}")]
    NotFound(String),

    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PinError {
    pub fn network(key: impl ToString, reason: impl ToString) -> Self {
        Self::NetworkUnavailable {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for pin operations
pub type Result<T> = std::result::Result<T, PinError>;
