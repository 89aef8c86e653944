//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
///
/// Backends wrap their native failures into these variants and return them
/// to the caller unchanged; no store retries internally.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Thread or checkpoint does not exist
    #[error("Checkpoint not found: thread '{thread_id}', checkpoint '{checkpoint_id}'")]
    NotFound {
        /// Thread the lookup was scoped to
        thread_id: String,
        /// Checkpoint id that was requested (empty for thread-level lookups)
        checkpoint_id: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Relational backend error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid checkpoint or identifier
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// A load was attempted through a manager that has no store configured
    #[error("No checkpoint store configured")]
    Unavailable,
}

impl CheckpointError {
    /// Create a not-found error for a specific checkpoint
    pub fn not_found(thread_id: impl Into<String>, checkpoint_id: impl Into<String>) -> Self {
        CheckpointError::NotFound {
            thread_id: thread_id.into(),
            checkpoint_id: checkpoint_id.into(),
        }
    }

    /// Create a storage error from any displayable backend failure
    pub fn storage(msg: impl std::fmt::Display) -> Self {
        CheckpointError::Storage(msg.to_string())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, CheckpointError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = CheckpointError::not_found("t1", "s2");
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Checkpoint not found: thread 't1', checkpoint 's2'"
        );
    }

    #[test]
    fn test_storage_is_not_not_found() {
        let err = CheckpointError::storage("disk full");
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("disk full"));
    }
}
