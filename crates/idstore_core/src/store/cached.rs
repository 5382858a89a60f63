//! Write-through, clone-on-read cache in front of a generic store.
//!
//! Coherence rules:
//!
//! - A read populates the cache only if its transaction has no uncommitted
//!   writes and no write to this store happened while it was loading (the
//!   cache generation is unchanged).
//! - A transaction with uncommitted writes bypasses the cache, so it always
//!   reads its own writes.
//! - A write evicts the affected entries after the store accepted it and
//!   again when the transaction completes, so neither a tentative nor a
//!   superseded value stays cached.

use crate::config::CacheConfig;
use crate::error::CoreResult;
use crate::store::cache_registry::{CacheRegistry, CacheStats, InvalidatableCache};
use crate::store::{
    CreateCheck, GenericRecordStore, ObjectStore, RemovalCheck, Stored, StoredObject, UpdateCheck,
};
use crate::transaction::Transaction;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CacheEntry<T> {
    stored: Stored<T>,
    inserted_at: Instant,
}

struct CacheState<T> {
    by_key: HashMap<i64, CacheEntry<T>>,
    names: HashMap<String, i64>,
    generation: u64,
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            names: HashMap::new(),
            generation: 0,
        }
    }
}

impl<T> CacheState<T> {
    fn remove_key(&mut self, key: i64) {
        if let Some(entry) = self.by_key.remove(&key) {
            if let Some(name) = entry.stored.name {
                if self.names.get(&name) == Some(&key) {
                    self.names.remove(&name);
                }
            }
        }
    }

    fn remove_name(&mut self, name: &str) {
        if let Some(key) = self.names.remove(name) {
            self.remove_key(key);
        }
        self.by_key
            .retain(|_, entry| entry.stored.name.as_deref() != Some(name));
    }
}

struct ObjectCache<T> {
    state: RwLock<CacheState<T>>,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

enum Lookup<'a> {
    Key(i64),
    Name(&'a str),
}

impl<T: StoredObject> ObjectCache<T> {
    fn new(ttl: Option<Duration>) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry<T>) -> bool {
        self.ttl
            .map_or(true, |ttl| entry.inserted_at.elapsed() < ttl)
    }

    /// Returns a clone of the cached object and the generation observed.
    fn get(&self, lookup: &Lookup<'_>) -> (Option<Stored<T>>, u64) {
        let expired_key = {
            let state = self.state.read();
            let key = match lookup {
                Lookup::Key(key) => Some(*key),
                Lookup::Name(name) => state.names.get(*name).copied(),
            };
            match key.and_then(|k| state.by_key.get(&k).map(|e| (k, e))) {
                Some((_, entry)) if self.is_fresh(entry) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return (Some(entry.stored.clone()), state.generation);
                }
                Some((key, _)) => Some(key),
                None => None,
            }
        };

        let mut state = self.state.write();
        if let Some(key) = expired_key {
            state.remove_key(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        (None, state.generation)
    }

    fn insert_if_unchanged(&self, generation: u64, stored: &Stored<T>) {
        let mut state = self.state.write();
        if state.generation != generation {
            return;
        }
        if let Some(name) = &stored.name {
            state.names.insert(name.clone(), stored.key);
        }
        state.by_key.insert(
            stored.key,
            CacheEntry {
                stored: stored.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    fn evict_key(&self, key: i64) {
        let mut state = self.state.write();
        state.remove_key(key);
        state.generation += 1;
    }

    fn evict_name(&self, name: &str) {
        let mut state = self.state.write();
        state.remove_name(name);
        state.generation += 1;
    }

    fn clear(&self) {
        let mut state = self.state.write();
        state.by_key.clear();
        state.names.clear();
        state.generation += 1;
    }
}

impl<T: StoredObject> InvalidatableCache for ObjectCache<T> {
    fn object_type(&self) -> &str {
        T::OBJECT_TYPE
    }

    fn invalidate(&self) {
        self.clear();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.state.read().by_key.len(),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// A [`GenericRecordStore`] with a write-through cache.
///
/// Cache hits return deep copies; modifying a returned object never affects
/// the cache. Lists and counts are always read from storage.
pub struct CachingDecorator<T: StoredObject> {
    inner: GenericRecordStore<T>,
    cache: Arc<ObjectCache<T>>,
    enabled: bool,
}

impl<T: StoredObject> Clone for CachingDecorator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cache: Arc::clone(&self.cache),
            enabled: self.enabled,
        }
    }
}

impl<T: StoredObject> std::fmt::Debug for CachingDecorator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingDecorator")
            .field("object_type", &T::OBJECT_TYPE)
            .field("enabled", &self.enabled)
            .field("stats", &self.cache.stats())
            .finish()
    }
}

impl<T: StoredObject> CachingDecorator<T> {
    /// Wraps `inner` and registers the cache with `registry`.
    pub fn new(inner: GenericRecordStore<T>, registry: &CacheRegistry, config: &CacheConfig) -> Self {
        let cache = Arc::new(ObjectCache::new(config.ttl));
        let handle: Arc<dyn InvalidatableCache> = Arc::clone(&cache) as Arc<dyn InvalidatableCache>;
        registry.register(&handle);
        Self {
            inner,
            cache,
            enabled: config.enabled,
        }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &GenericRecordStore<T> {
        &self.inner
    }

    /// Returns the cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drops every cached entry of this store.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    fn read(
        &self,
        tx: &Transaction,
        lookup: Lookup<'_>,
        load: impl FnOnce() -> CoreResult<Stored<T>>,
    ) -> CoreResult<Stored<T>> {
        if !self.enabled || tx.is_dirty() {
            return load();
        }
        let (cached, generation) = self.cache.get(&lookup);
        if let Some(stored) = cached {
            return Ok(stored);
        }
        let stored = load()?;
        if !tx.is_dirty() {
            self.cache.insert_if_unchanged(generation, &stored);
        }
        Ok(stored)
    }

    fn after_write_key(&self, tx: &Transaction, key: i64) {
        if !self.enabled {
            return;
        }
        self.cache.evict_key(key);
        let cache = Arc::clone(&self.cache);
        tx.on_completion(move |_| cache.evict_key(key));
    }

    fn after_write_name(&self, tx: &Transaction, name: &str) {
        if !self.enabled {
            return;
        }
        self.cache.evict_name(name);
        let cache = Arc::clone(&self.cache);
        let name = name.to_string();
        tx.on_completion(move |_| cache.evict_name(&name));
    }
}

impl<T: StoredObject> ObjectStore<T> for CachingDecorator<T> {
    fn create(&self, tx: &Transaction, value: &T) -> CoreResult<i64> {
        let key = self.inner.create(tx, value)?;
        self.after_write_key(tx, key);
        Ok(key)
    }

    fn create_with_id(&self, tx: &Transaction, key: i64, value: &T) -> CoreResult<()> {
        self.inner.create_with_id(tx, key, value)?;
        self.after_write_key(tx, key);
        Ok(())
    }

    fn get_by_key(&self, tx: &Transaction, key: i64) -> CoreResult<Stored<T>> {
        self.read(tx, Lookup::Key(key), || self.inner.get_by_key(tx, key))
    }

    fn get_by_name(&self, tx: &Transaction, name: &str) -> CoreResult<Stored<T>> {
        self.read(tx, Lookup::Name(name), || self.inner.get_by_name(tx, name))
    }

    fn exists(&self, tx: &Transaction, name: &str) -> CoreResult<bool> {
        self.inner.exists(tx, name)
    }

    fn update_by_key(&self, tx: &Transaction, key: i64, value: &T) -> CoreResult<()> {
        self.inner.update_by_key(tx, key, value)?;
        self.after_write_key(tx, key);
        Ok(())
    }

    fn update_by_name(&self, tx: &Transaction, name: &str, value: &T) -> CoreResult<()> {
        self.inner.update_by_name(tx, name, value)?;
        self.after_write_name(tx, name);
        Ok(())
    }

    fn delete_by_key(&self, tx: &Transaction, key: i64) -> CoreResult<()> {
        self.inner.delete_by_key(tx, key)?;
        self.after_write_key(tx, key);
        Ok(())
    }

    fn delete_by_name(&self, tx: &Transaction, name: &str) -> CoreResult<()> {
        self.inner.delete_by_name(tx, name)?;
        self.after_write_name(tx, name);
        Ok(())
    }

    fn get_all(&self, tx: &Transaction) -> CoreResult<Vec<Stored<T>>> {
        self.inner.get_all(tx)
    }

    fn count(&self, tx: &Transaction) -> CoreResult<u64> {
        self.inner.count(tx)
    }

    fn delete_all(&self, tx: &Transaction) -> CoreResult<u64> {
        let removed = self.inner.delete_all(tx)?;
        if self.enabled {
            self.cache.clear();
            let cache = Arc::clone(&self.cache);
            tx.on_completion(move |_| cache.clear());
        }
        Ok(removed)
    }

    fn add_removal_handler(&self, owner_type: &str, check: RemovalCheck<T>) {
        self.inner.add_removal_handler(owner_type, check);
    }

    fn add_update_handler(&self, owner_type: &str, check: UpdateCheck<T>) {
        self.inner.add_update_handler(owner_type, check);
    }

    fn add_create_handler(&self, owner_type: &str, check: CreateCheck<T>) {
        self.inner.add_create_handler(owner_type, check);
    }
}
