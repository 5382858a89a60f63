//! Registry of caches for bulk invalidation.

use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::info;

/// Counters of one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from the cache.
    pub hits: u64,
    /// Reads that went to storage.
    pub misses: u64,
    /// Entries currently cached.
    pub entries: usize,
    /// Full invalidations.
    pub invalidations: u64,
}

/// A cache that can be cleared from outside.
pub trait InvalidatableCache: Send + Sync {
    /// Object type the cache holds.
    fn object_type(&self) -> &str;

    /// Drops every entry. Reads issued after this returns see storage state.
    fn invalidate(&self);

    /// Returns the current counters.
    fn stats(&self) -> CacheStats;
}

/// Keeps track of every live cache so they can be invalidated together,
/// for example after a bulk import.
///
/// Holds weak references: dropping the last handle to a cached store
/// unregisters its cache.
#[derive(Clone, Default)]
pub struct CacheRegistry {
    caches: Arc<RwLock<Vec<Weak<dyn InvalidatableCache>>>>,
}

impl CacheRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cache.
    pub fn register(&self, cache: &Arc<dyn InvalidatableCache>) {
        self.caches.write().push(Arc::downgrade(cache));
    }

    /// Clears every registered cache.
    pub fn invalidate_all(&self) {
        let live = self.live();
        for cache in &live {
            cache.invalidate();
        }
        info!(caches = live.len(), "invalidated all caches");
    }

    /// Returns `(object_type, stats)` for every registered cache.
    #[must_use]
    pub fn stats(&self) -> Vec<(String, CacheStats)> {
        self.live()
            .iter()
            .map(|c| (c.object_type().to_string(), c.stats()))
            .collect()
    }

    /// Number of live registered caches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live().len()
    }

    /// Returns true if no live cache is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self) -> Vec<Arc<dyn InvalidatableCache>> {
        let mut caches = self.caches.write();
        caches.retain(|weak| weak.strong_count() > 0);
        caches.iter().filter_map(Weak::upgrade).collect()
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("caches", &self.caches.read().len())
            .finish()
    }
}
