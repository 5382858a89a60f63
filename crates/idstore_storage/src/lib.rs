//! # idstore Storage
//!
//! Session providers for idstore.
//!
//! A [`SessionProvider`] hands out [`Session`]s: units of isolation over a
//! keyed row store. Rows are [`Record`]s grouped by object type; their
//! `contents` are opaque bytes owned by the layer above.
//!
//! ## Design Principles
//!
//! - Writes are buffered per session and applied atomically on commit
//! - Concurrency is optimistic: commits that lost a race fail with a
//!   conflict-class error and may be retried by the caller
//! - Keys are allocated from a monotonic counter and never reused
//! - Providers must be `Send + Sync`; sessions are `Send`
//!
//! ## Available Providers
//!
//! - [`InMemoryProvider`] - For tests and ephemeral stores
//! - [`FileProvider`] - Persists committed state to a locked directory
//!
//! ## Example
//!
//! ```rust
//! use idstore_storage::{InMemoryProvider, Record, SessionProvider};
//!
//! let provider = InMemoryProvider::new();
//! let mut session = provider.acquire(true).unwrap();
//! let key = session.allocate_key().unwrap();
//! session.insert(Record::new("group", key, Some("/".into()), vec![])).unwrap();
//! session.commit().unwrap();
//! assert!(session.get_by_name("group", "/").unwrap().is_some());
//! provider.release(session).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod record;
mod session;
mod stats;

pub use error::{StorageError, StorageResult};
pub use file::{FileProvider, SNAPSHOT_VERSION};
pub use memory::{InMemoryProvider, MemorySession};
pub use record::{now_millis, Record};
pub use session::{Session, SessionId, SessionProvider};
pub use stats::ProviderStats;
