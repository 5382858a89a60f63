//! # idstore Testkit
//!
//! Test utilities for idstore.
//!
//! This crate provides:
//! - Identity-flavoured fixture types with referential hooks between them
//! - Ready-made in-memory and file-backed test environments
//! - Property-based test generators using proptest
//! - Concurrency stress helpers
//!
//! ## Usage
//!
//! ```rust
//! use idstore_core::ObjectStore;
//! use idstore_testkit::prelude::*;
//!
//! let env = TestEnv::memory();
//! env.populate().unwrap();
//! let count = env
//!     .runner()
//!     .run_in_transaction_ret(|tx| env.credentials.count(tx))
//!     .unwrap();
//! assert_eq!(count, 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
