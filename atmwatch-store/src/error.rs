//! Store error types.

use atmwatch_core::CoreError;
use thiserror::Error;

/// Errors that can occur in the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQLite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A finalized execution record was written again.
    #[error("Execution {0} already finalized")]
    AlreadyFinalized(String),

    /// A blocking task was cancelled or panicked.
    #[error("Background task failed: {0}")]
    Task(String),

    /// Stored data could not be interpreted.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyFinalized(id) => CoreError::AlreadyFinalized(id),
            StoreError::Serialization(e) => CoreError::Serialization(e),
            other => CoreError::Persistence(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_mapping() {
        let err = CoreError::from(StoreError::AlreadyFinalized("abc".into()));
        assert!(matches!(err, CoreError::AlreadyFinalized(id) if id == "abc"));

        let err = CoreError::from(StoreError::Task("cancelled".into()));
        match err {
            CoreError::Persistence(message) => assert!(message.contains("cancelled")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
