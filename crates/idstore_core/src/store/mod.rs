//! Typed object stores.
//!
//! [`GenericRecordStore`] maps a [`StoredObject`] type onto storage records.
//! [`CachingDecorator`] wraps it with a write-through, clone-on-read cache.
//! Both implement [`ObjectStore`], so callers do not care which one they hold.

mod cache_registry;
mod cached;
mod generic;
mod object;

pub use cache_registry::{CacheRegistry, CacheStats, InvalidatableCache};
pub use cached::CachingDecorator;
pub use generic::GenericRecordStore;
pub use object::{Stored, StoredObject};

use crate::error::CoreResult;
use crate::hooks::HookOutcome;
use crate::transaction::Transaction;

/// Typed before-delete check.
pub type RemovalCheck<T> =
    Box<dyn Fn(&Transaction, &Stored<T>) -> CoreResult<HookOutcome> + Send + Sync>;

/// Typed before-update check; receives the stored object and its replacement.
pub type UpdateCheck<T> =
    Box<dyn Fn(&Transaction, &Stored<T>, &T) -> CoreResult<HookOutcome> + Send + Sync>;

/// Typed before-create check.
pub type CreateCheck<T> = Box<dyn Fn(&Transaction, &T) -> CoreResult<HookOutcome> + Send + Sync>;

/// Key- and name-addressed CRUD over one object type.
///
/// Every operation runs against the session of the passed transaction.
pub trait ObjectStore<T: StoredObject>: Send + Sync {
    /// Stores a new object under a freshly allocated key.
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if the name is taken.
    fn create(&self, tx: &Transaction, value: &T) -> CoreResult<i64>;

    /// Stores a new object under `key`.
    fn create_with_id(&self, tx: &Transaction, key: i64, value: &T) -> CoreResult<()>;

    /// Loads an object by key.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no such object.
    fn get_by_key(&self, tx: &Transaction, key: i64) -> CoreResult<Stored<T>>;

    /// Loads an object by name.
    fn get_by_name(&self, tx: &Transaction, name: &str) -> CoreResult<Stored<T>>;

    /// Returns true if an object with `name` exists.
    fn exists(&self, tx: &Transaction, name: &str) -> CoreResult<bool>;

    /// Replaces the object stored under `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent, `DuplicateKey` when renamed onto a taken name,
    /// `ReferentialViolation` if an update hook blocks.
    fn update_by_key(&self, tx: &Transaction, key: i64, value: &T) -> CoreResult<()>;

    /// Replaces the object stored under `name`.
    fn update_by_name(&self, tx: &Transaction, name: &str, value: &T) -> CoreResult<()>;

    /// Removes the object stored under `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent, `ReferentialViolation` if a removal hook blocks.
    fn delete_by_key(&self, tx: &Transaction, key: i64) -> CoreResult<()>;

    /// Removes the object stored under `name`.
    fn delete_by_name(&self, tx: &Transaction, name: &str) -> CoreResult<()>;

    /// Loads every object, ordered by key.
    fn get_all(&self, tx: &Transaction) -> CoreResult<Vec<Stored<T>>>;

    /// Counts the stored objects.
    fn count(&self, tx: &Transaction) -> CoreResult<u64>;

    /// Removes every object without consulting hooks.
    fn delete_all(&self, tx: &Transaction) -> CoreResult<u64>;

    /// Registers a before-delete check on behalf of `owner_type`.
    fn add_removal_handler(&self, owner_type: &str, check: RemovalCheck<T>);

    /// Registers a before-update check on behalf of `owner_type`.
    fn add_update_handler(&self, owner_type: &str, check: UpdateCheck<T>);

    /// Registers a before-create check on behalf of `owner_type`.
    fn add_create_handler(&self, owner_type: &str, check: CreateCheck<T>);
}
