//! Construction of stores and their shared services.

use crate::config::Config;
use crate::error::CoreResult;
use crate::export::{ImportExportEngine, RawExporter, TypedExporter};
use crate::hooks::ReferentialHookRegistry;
use crate::store::{CacheRegistry, CachingDecorator, GenericRecordStore, StoredObject};
use crate::transaction::TransactionRunner;
use idstore_storage::SessionProvider;
use std::sync::Arc;
use tracing::info;

/// Wires a provider to a runner, hook and cache registries and the
/// import/export engine, and hands out stores that share them.
///
/// Every store created here is registered as an exporter with the given
/// priority.
#[derive(Clone)]
pub struct StoreRegistry {
    provider: Arc<dyn SessionProvider>,
    config: Config,
    runner: TransactionRunner,
    hooks: ReferentialHookRegistry,
    caches: CacheRegistry,
    engine: ImportExportEngine,
}

impl StoreRegistry {
    /// Creates a registry over `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn SessionProvider>, config: Config) -> Self {
        let runner = TransactionRunner::new(Arc::clone(&provider), &config);
        let hooks = ReferentialHookRegistry::new();
        let caches = CacheRegistry::new();
        let engine = ImportExportEngine::new(
            runner.clone(),
            hooks.clone(),
            caches.clone(),
            config.export,
        );
        Self {
            provider,
            config,
            runner,
            hooks,
            caches,
            engine,
        }
    }

    /// Creates an uncached store for `T`.
    #[must_use]
    pub fn generic_store<T: StoredObject>(&self, priority: i32) -> GenericRecordStore<T> {
        self.engine
            .register_exporter(Arc::new(TypedExporter::<T>::new(priority)));
        GenericRecordStore::new(self.hooks.clone())
    }

    /// Creates a cached store for `T` using the configured cache settings.
    #[must_use]
    pub fn cached_store<T: StoredObject>(&self, priority: i32) -> CachingDecorator<T> {
        let inner = self.generic_store::<T>(priority);
        CachingDecorator::new(inner, &self.caches, &self.config.cache)
    }

    /// Registers a type known only by name so it takes part in dumps.
    pub fn register_raw_type(&self, object_type: impl Into<String>, priority: i32) {
        self.engine
            .register_exporter(Arc::new(RawExporter::new(object_type, priority)));
    }

    /// The transaction runner.
    #[must_use]
    pub fn runner(&self) -> &TransactionRunner {
        &self.runner
    }

    /// The hook registry shared by all stores.
    #[must_use]
    pub fn hooks(&self) -> &ReferentialHookRegistry {
        &self.hooks
    }

    /// The cache registry shared by all cached stores.
    #[must_use]
    pub fn caches(&self) -> &CacheRegistry {
        &self.caches
    }

    /// The import/export engine.
    #[must_use]
    pub fn import_export(&self) -> &ImportExportEngine {
        &self.engine
    }

    /// The configuration the registry was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying session provider.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn SessionProvider> {
        &self.provider
    }

    /// Deletes every registered type, highest priority first, and
    /// invalidates all caches. Returns the number of records removed.
    pub fn clear_all(&self) -> CoreResult<u64> {
        let removed = self
            .runner
            .run_in_separate_transaction(|tx| self.engine.clear_registered(tx))?;
        self.caches.invalidate_all();
        info!(removed, "all registered types cleared");
        Ok(removed)
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("config", &self.config)
            .field("runner", &self.runner)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
