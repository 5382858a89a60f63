//! Session and session provider traits.

use crate::error::StorageResult;
use crate::record::Record;
use crate::stats::ProviderStats;
use std::fmt;
use uuid::Uuid;

/// Identifier of a session handed out by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw persistence session.
///
/// A session is a unit of isolation: writes are buffered until [`Session::commit`]
/// and reads see committed state overlaid with the session's own pending writes.
/// Non-transactional sessions commit every write immediately.
///
/// # Invariants
///
/// - Writes are applied in program order.
/// - `commit` either applies every pending write or none of them.
/// - A commit that loses a race with another session fails with a
///   conflict-class error (see [`crate::StorageError::is_conflict`]) and leaves
///   the session rolled back.
pub trait Session: Send {
    /// Returns this session's id.
    fn id(&self) -> SessionId;

    /// Returns true if writes are buffered until commit.
    fn is_transactional(&self) -> bool;

    /// Reserves a fresh key. Keys are never reused, even if the session rolls back.
    fn allocate_key(&mut self) -> StorageResult<i64>;

    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// `DuplicateKey` or `DuplicateName` if visible state already holds the key or name.
    fn insert(&mut self, record: Record) -> StorageResult<()>;

    /// Reads a row by key.
    fn get(&mut self, object_type: &str, key: i64) -> StorageResult<Option<Record>>;

    /// Reads a row by name.
    fn get_by_name(&mut self, object_type: &str, name: &str) -> StorageResult<Option<Record>>;

    /// Replaces an existing row.
    ///
    /// # Errors
    ///
    /// `NotFound` if the row does not exist, `DuplicateName` if it is renamed onto
    /// a name held by another row.
    fn update(&mut self, record: Record) -> StorageResult<()>;

    /// Deletes a row, returning whether it existed.
    fn delete(&mut self, object_type: &str, key: i64) -> StorageResult<bool>;

    /// Returns all rows of a type ordered by key.
    fn scan(&mut self, object_type: &str) -> StorageResult<Vec<Record>>;

    /// Counts the rows of a type.
    fn count(&mut self, object_type: &str) -> StorageResult<u64>;

    /// Deletes every row of a type, returning how many were removed.
    fn delete_all(&mut self, object_type: &str) -> StorageResult<u64>;

    /// Lists the object types that currently have rows.
    fn object_types(&mut self) -> StorageResult<Vec<String>>;

    /// Returns true if the session holds uncommitted writes.
    fn is_dirty(&self) -> bool;

    /// Commits pending writes.
    fn commit(&mut self) -> StorageResult<()>;

    /// Discards pending writes.
    fn rollback(&mut self) -> StorageResult<()>;
}

/// Hands out sessions from a pool of connections.
///
/// Every session must be given back with [`SessionProvider::release`] exactly once.
/// Releasing a session with uncommitted writes discards them.
pub trait SessionProvider: Send + Sync {
    /// Acquires a new session.
    fn acquire(&self, transactional: bool) -> StorageResult<Box<dyn Session>>;

    /// Returns a session to the provider.
    ///
    /// # Errors
    ///
    /// `UnknownSession` if the session is not currently open in this provider.
    fn release(&self, session: Box<dyn Session>) -> StorageResult<()>;

    /// Returns a snapshot of usage counters.
    fn stats(&self) -> ProviderStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
