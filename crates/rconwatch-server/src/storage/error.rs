//! Storage error types.
//!
//! Defines errors that can occur during storage operations:
//! - `NotFound`: Requested session doesn't exist
//! - `Conflict`: Event index gap detected (append-order violation)
//! - `Serialization`: Failed to encode/decode data
//! - `Io`: Underlying storage system errors

use rconwatch_core::SessionId;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Session not found
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// Event index conflict (gap or overwrite in the log)
    ///
    /// Occurs when appending at an index that doesn't match the next free
    /// position, for example writing index 5 when the log holds 3 events.
    #[error("event index conflict: expected {expected}, got {got}")]
    Conflict {
        /// Next free index (current log length)
        expected: u64,
        /// Index the caller tried to write
        got: u64,
    },

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Returns true if the operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
