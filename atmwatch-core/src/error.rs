//! Core error types for atmwatch.

use thiserror::Error;

/// Core error type for atmwatch operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The execution record was already finalized.
    #[error("Execution {0} already finalized")]
    AlreadyFinalized(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistence collaborator failed.
    #[error("Persistence error: {0}")]
    Persistence(String),
}
