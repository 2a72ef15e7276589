//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
///
/// Storage failures are fatal to the current operation and never silently
/// lose a mutation: the enclosing transaction rolls back as a unit.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found.
    #[error("record not found: {collection}/{id}")]
    NotFound {
        /// Collection name.
        collection: String,
        /// Record identifier.
        id: String,
    },

    /// Write targeted a tombstoned record.
    #[error("record is deleted: {collection}/{id}")]
    Deleted {
        /// Collection name.
        collection: String,
        /// Record identifier.
        id: String,
    },

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data failed to decode.
    #[error("invalid data: {0}")]
    InvalidData(String),
}
