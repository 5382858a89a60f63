//! Generic record store.

use crate::error::{CoreError, CoreResult};
use crate::hooks::{CreateHook, ReferentialHook, ReferentialHookRegistry, UpdateHook};
use crate::store::{CreateCheck, ObjectStore, RemovalCheck, Stored, StoredObject, UpdateCheck};
use crate::transaction::Transaction;
use idstore_storage::Record;
use std::marker::PhantomData;
use tracing::debug;

/// Stores objects of type `T` as records of type `T::OBJECT_TYPE`.
///
/// The store itself is stateless apart from its hook registry handle; all
/// data lives in the transaction's session.
pub struct GenericRecordStore<T> {
    hooks: ReferentialHookRegistry,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for GenericRecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for GenericRecordStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericRecordStore")
            .field("object_type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: StoredObject> GenericRecordStore<T> {
    /// Creates a store that consults `hooks`.
    #[must_use]
    pub fn new(hooks: ReferentialHookRegistry) -> Self {
        Self {
            hooks,
            _marker: PhantomData,
        }
    }

    /// The object type this store manages.
    #[must_use]
    pub fn object_type(&self) -> &'static str {
        T::OBJECT_TYPE
    }

    fn load_by_key(&self, tx: &Transaction, key: i64) -> CoreResult<Record> {
        tx.with_session(|s| s.get(T::OBJECT_TYPE, key))?
            .ok_or_else(|| CoreError::not_found(T::OBJECT_TYPE, key))
    }

    fn load_by_name(&self, tx: &Transaction, name: &str) -> CoreResult<Record> {
        tx.with_session(|s| s.get_by_name(T::OBJECT_TYPE, name))?
            .ok_or_else(|| CoreError::not_found(T::OBJECT_TYPE, name))
    }

    fn insert(&self, tx: &Transaction, key: i64, value: &T) -> CoreResult<()> {
        let record = Record::new(
            T::OBJECT_TYPE,
            key,
            value.name().map(str::to_string),
            value.encode()?,
        );
        self.hooks.check_create(tx, &record)?;
        tx.with_session(|s| s.insert(record))
    }

    fn replace(&self, tx: &Transaction, current: Record, value: &T) -> CoreResult<()> {
        let updated = current.next_revision(value.name().map(str::to_string), value.encode()?);
        self.hooks.check_update(tx, &current, &updated)?;
        tx.with_session(|s| s.update(updated))
    }

    fn remove(&self, tx: &Transaction, record: Record) -> CoreResult<()> {
        self.hooks.check_removal(tx, &record)?;
        let removed = tx.with_session(|s| s.delete(T::OBJECT_TYPE, record.key))?;
        if !removed {
            return Err(CoreError::not_found(T::OBJECT_TYPE, record.key));
        }
        debug!(object_type = T::OBJECT_TYPE, key = record.key, "object removed");
        Ok(())
    }
}

impl<T: StoredObject> ObjectStore<T> for GenericRecordStore<T> {
    fn create(&self, tx: &Transaction, value: &T) -> CoreResult<i64> {
        let key = tx.with_session(|s| s.allocate_key())?;
        self.insert(tx, key, value)?;
        Ok(key)
    }

    fn create_with_id(&self, tx: &Transaction, key: i64, value: &T) -> CoreResult<()> {
        self.insert(tx, key, value)
    }

    fn get_by_key(&self, tx: &Transaction, key: i64) -> CoreResult<Stored<T>> {
        Stored::from_record(&self.load_by_key(tx, key)?)
    }

    fn get_by_name(&self, tx: &Transaction, name: &str) -> CoreResult<Stored<T>> {
        Stored::from_record(&self.load_by_name(tx, name)?)
    }

    fn exists(&self, tx: &Transaction, name: &str) -> CoreResult<bool> {
        Ok(tx
            .with_session(|s| s.get_by_name(T::OBJECT_TYPE, name))?
            .is_some())
    }

    fn update_by_key(&self, tx: &Transaction, key: i64, value: &T) -> CoreResult<()> {
        let current = self.load_by_key(tx, key)?;
        self.replace(tx, current, value)
    }

    fn update_by_name(&self, tx: &Transaction, name: &str, value: &T) -> CoreResult<()> {
        let current = self.load_by_name(tx, name)?;
        self.replace(tx, current, value)
    }

    fn delete_by_key(&self, tx: &Transaction, key: i64) -> CoreResult<()> {
        let record = self.load_by_key(tx, key)?;
        self.remove(tx, record)
    }

    fn delete_by_name(&self, tx: &Transaction, name: &str) -> CoreResult<()> {
        let record = self.load_by_name(tx, name)?;
        self.remove(tx, record)
    }

    fn get_all(&self, tx: &Transaction) -> CoreResult<Vec<Stored<T>>> {
        tx.with_session(|s| s.scan(T::OBJECT_TYPE))?
            .iter()
            .map(Stored::from_record)
            .collect()
    }

    fn count(&self, tx: &Transaction) -> CoreResult<u64> {
        tx.with_session(|s| s.count(T::OBJECT_TYPE))
    }

    fn delete_all(&self, tx: &Transaction) -> CoreResult<u64> {
        tx.with_session(|s| s.delete_all(T::OBJECT_TYPE))
    }

    fn add_removal_handler(&self, owner_type: &str, check: RemovalCheck<T>) {
        self.hooks.register(
            T::OBJECT_TYPE,
            ReferentialHook::new(owner_type, move |tx, record| {
                check(tx, &Stored::from_record(record)?)
            }),
        );
    }

    fn add_update_handler(&self, owner_type: &str, check: UpdateCheck<T>) {
        self.hooks.register_update(
            T::OBJECT_TYPE,
            UpdateHook::new(owner_type, move |tx, current, updated| {
                let updated = T::decode(&updated.contents)?;
                check(tx, &Stored::from_record(current)?, &updated)
            }),
        );
    }

    fn add_create_handler(&self, owner_type: &str, check: CreateCheck<T>) {
        self.hooks.register_create(
            T::OBJECT_TYPE,
            CreateHook::new(owner_type, move |tx, record| {
                check(tx, &T::decode(&record.contents)?)
            }),
        );
    }
}
