//! Error types for sync-store.

use std::path::PathBuf;

/// Local cache errors. Callers treat every variant as "cache unavailable".
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored payload or timestamp could not be decoded.
    #[error("corrupt cache row {id}: {reason}")]
    Corrupt {
        /// Row id.
        id: String,
        /// What could not be decoded.
        reason: String,
    },

    /// A payload could not be encoded for storage.
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store was closed.
    #[error("cache store is closed")]
    Closed,

    /// A record was written to the wrong table.
    #[error("record {id} is a {actual}, expected {expected}")]
    KindMismatch {
        /// Record id.
        id: String,
        /// Table being written.
        expected: sync_types::EntityKind,
        /// The record's own kind.
        actual: sync_types::EntityKind,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

impl StorageError {
    /// Map a sqlx error, folding pool shutdown into [`StorageError::Closed`].
    pub(crate) fn db(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => Self::Closed,
            other => Self::Database(other),
        }
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
