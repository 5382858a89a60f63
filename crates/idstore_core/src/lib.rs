//! # idstore Core
//!
//! Unit-of-work and object store layer for idstore.
//!
//! This crate provides:
//! - Nested transactions with join/separate propagation and retry on conflict
//! - Versioned, key- and name-addressed object stores
//! - A write-through cache decorator with bulk invalidation
//! - Referential hooks that let dependent stores veto changes
//! - JSON dump import/export with format upgrades and payload hotfixes
//!
//! ## Example
//!
//! ```rust
//! use idstore_codec::{from_json_bytes, to_json_bytes, CodecResult};
//! use idstore_core::{Config, ObjectStore, StoreRegistry, StoredObject};
//! use idstore_storage::InMemoryProvider;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Group {
//!     path: String,
//! }
//!
//! impl StoredObject for Group {
//!     const OBJECT_TYPE: &'static str = "group";
//!
//!     fn name(&self) -> Option<&str> {
//!         Some(&self.path)
//!     }
//!
//!     fn encode(&self) -> CodecResult<Vec<u8>> {
//!         to_json_bytes(self)
//!     }
//!
//!     fn decode(bytes: &[u8]) -> CodecResult<Self> {
//!         from_json_bytes(bytes)
//!     }
//! }
//!
//! let registry = StoreRegistry::new(Arc::new(InMemoryProvider::new()), Config::default());
//! let groups = registry.cached_store::<Group>(10);
//!
//! registry
//!     .runner()
//!     .run_in_transaction(|tx| {
//!         groups.create(tx, &Group { path: "/".into() })?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let root = registry
//!     .runner()
//!     .run_in_transaction_ret(|tx| groups.get_by_name(tx, "/"))
//!     .unwrap();
//! assert_eq!(root.revision, 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
pub mod export;
mod hooks;
mod registry;
mod store;
pub mod transaction;

pub use config::{CacheConfig, Config, ExportConfig};
pub use error::{CoreError, CoreResult, ObjectRef};
pub use export::{
    ExportDocument, ExportSelection, Exporter, HotfixOptions, ImportExportEngine, ImportOptions,
    RecordFix, ScalarToArrayFix,
};
pub use hooks::{CreateHook, HookOutcome, ReferentialHook, ReferentialHookRegistry, UpdateHook};
pub use registry::StoreRegistry;
pub use store::{
    CacheRegistry, CacheStats, CachingDecorator, CreateCheck, GenericRecordStore,
    InvalidatableCache, ObjectStore, RemovalCheck, Stored, StoredObject, UpdateCheck,
};
pub use transaction::{
    CancellationToken, Completion, Propagation, Transaction, TransactionRunner, TxOptions,
};
