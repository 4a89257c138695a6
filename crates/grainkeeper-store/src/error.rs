//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Required row not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Row with the same key already exists.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// A stored record could not be decoded.
    #[error("corrupt record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Blocking task failed or lock was poisoned.
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
