//! Error types for storage operations.

use crate::session::SessionId;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A concurrent transaction changed a row this session depends on.
    #[error("conflict on {object_type}#{key}: {reason}")]
    Conflict {
        /// Object type of the contended row.
        object_type: String,
        /// Key of the contended row.
        key: i64,
        /// What was detected.
        reason: String,
    },

    /// A row with the same key already exists.
    #[error("duplicate key {key} for object type {object_type}")]
    DuplicateKey {
        /// Object type of the row.
        object_type: String,
        /// The duplicated key.
        key: i64,
    },

    /// A row with the same name already exists.
    #[error("duplicate name '{name}' for object type {object_type}")]
    DuplicateName {
        /// Object type of the row.
        object_type: String,
        /// The duplicated name.
        name: String,
    },

    /// The addressed row does not exist.
    #[error("row {key} of object type {object_type} not found")]
    NotFound {
        /// Object type of the row.
        object_type: String,
        /// The missing key.
        key: i64,
    },

    /// The session was already closed or released.
    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    /// The session was not handed out by this provider, or was released twice.
    #[error("session {0} is not open in this provider")]
    UnknownSession(SessionId),

    /// The on-disk snapshot could not be encoded or decoded.
    #[error("snapshot encoding error: {0}")]
    Encoding(String),

    /// The storage is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Every key up to `i64::MAX` has been handed out.
    #[error("key space exhausted")]
    KeysExhausted,

    /// Another process holds the store lock.
    #[error("store locked: another process has exclusive access")]
    Locked,
}

impl StorageError {
    /// Creates a conflict error.
    pub fn conflict(object_type: impl Into<String>, key: i64, reason: impl Into<String>) -> Self {
        Self::Conflict {
            object_type: object_type.into(),
            key,
            reason: reason.into(),
        }
    }

    /// Returns true if this error signals transient contention with another
    /// session, so that repeating the whole transaction may succeed.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
