//! Error types for idstore core.

use idstore_codec::CodecError;
use idstore_storage::StorageError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// How an object was addressed in a failing operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    /// Addressed by surrogate key.
    Key(i64),
    /// Addressed by unique name.
    Name(String),
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "#{key}"),
            Self::Name(name) => write!(f, "'{name}'"),
        }
    }
}

impl From<i64> for ObjectRef {
    fn from(key: i64) -> Self {
        Self::Key(key)
    }
}

impl From<&str> for ObjectRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ObjectRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// Errors that can occur in idstore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Non-conflict storage fault.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// I/O error while reading or writing a dump.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transient contention with a concurrent transaction.
    #[error("transaction conflict: {reason}")]
    Conflict {
        /// What was detected.
        reason: String,
    },

    /// A unit of work kept conflicting until the retry budget ran out.
    #[error("transaction failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last failure.
        #[source]
        source: Box<CoreError>,
    },

    /// The requested object does not exist.
    #[error("{object_type} {object} not found")]
    NotFound {
        /// Object type searched.
        object_type: String,
        /// Key or name searched.
        object: ObjectRef,
    },

    /// An object with the same key or name already exists.
    #[error("{object_type} {object} already exists")]
    DuplicateKey {
        /// Object type of the clash.
        object_type: String,
        /// The clashing key or name.
        object: ObjectRef,
    },

    /// The operation was vetoed by a dependent store.
    #[error("{object_type} {object} is used by {referenced_by}: {reason}")]
    ReferentialViolation {
        /// Object type of the protected object.
        object_type: String,
        /// The protected object.
        object: ObjectRef,
        /// Object type of the blocking referencer.
        referenced_by: String,
        /// Description supplied by the hook.
        reason: String,
    },

    /// A payload or dump could not be read or written.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the problem.
        message: String,
    },

    /// The operation was cancelled through a cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The transaction was marked rollback-only by a failed nested unit of work.
    #[error("transaction is marked rollback-only")]
    RollbackOnly,

    /// The unit of work aborted itself.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },

    /// The operation is not valid in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the problem.
        message: String,
    },

    /// A dump has a format version this build cannot read.
    #[error("unsupported dump format version {found} (supported up to {supported})")]
    UnsupportedFormat {
        /// Version found in the document.
        found: u32,
        /// Newest supported version.
        supported: u32,
    },
}

impl CoreError {
    /// Create a conflict error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(object_type: impl Into<String>, object: impl Into<ObjectRef>) -> Self {
        Self::NotFound {
            object_type: object_type.into(),
            object: object.into(),
        }
    }

    /// Create a duplicate-key error.
    pub fn duplicate_key(object_type: impl Into<String>, object: impl Into<ObjectRef>) -> Self {
        Self::DuplicateKey {
            object_type: object_type.into(),
            object: object.into(),
        }
    }

    /// Create a referential-violation error.
    pub fn referential_violation(
        object_type: impl Into<String>,
        object: impl Into<ObjectRef>,
        referenced_by: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ReferentialViolation {
            object_type: object_type.into(),
            object: object.into(),
            referenced_by: referenced_by.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Maps a storage error raised while committing.
    ///
    /// At commit time a duplicate key or name means another transaction won a
    /// race for it, so these are classified as conflicts alongside
    /// [`StorageError::Conflict`].
    #[must_use]
    pub fn from_commit_error(error: StorageError) -> Self {
        match error {
            StorageError::Conflict { .. }
            | StorageError::DuplicateKey { .. }
            | StorageError::DuplicateName { .. } => Self::conflict(error.to_string()),
            other => Self::from(other),
        }
    }

    /// Returns true if the runner may repeat the unit of work after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if this error was caused by contention, whether or not
    /// the retry budget was used up.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::RetriesExhausted { source, .. } => source.is_conflict(),
            _ => false,
        }
    }
}

/// Maps a storage error raised by an individual operation.
impl From<StorageError> for CoreError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Conflict { .. } => Self::conflict(error.to_string()),
            StorageError::DuplicateKey { object_type, key } => {
                Self::duplicate_key(object_type, ObjectRef::Key(key))
            }
            StorageError::DuplicateName { object_type, name } => {
                Self::duplicate_key(object_type, ObjectRef::Name(name))
            }
            StorageError::NotFound { object_type, key } => {
                Self::not_found(object_type, ObjectRef::Key(key))
            }
            other => Self::Storage(other),
        }
    }
}

impl From<CodecError> for CoreError {
    fn from(error: CodecError) -> Self {
        Self::serialization(error.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string())
    }
}
