//! Import and export of whole stores as JSON dumps.
//!
//! Every object type that should appear in a dump registers an [`Exporter`]
//! with a priority. Export writes types in ascending priority; import clears
//! them in descending priority and restores them in ascending priority, so
//! referenced objects exist before the objects that point at them.

mod document;
mod engine;
mod hotfix;
mod update;

pub use document::{checksum, ExportDocument, ExportEntry, ExportedRecord, FORMAT_VERSION};
pub use engine::ImportExportEngine;
pub use hotfix::{HotfixOptions, HotfixReport, RecordFix, ScalarToArrayFix};
pub use update::{
    upgrade, version_of, DumpUpdate, LegacyLayoutUpdate, UpdateContext, UNKNOWN_TYPE_PRIORITY,
};

use crate::error::CoreResult;
use crate::store::{Stored, StoredObject};
use idstore_codec::payload_to_json;
use idstore_storage::Record;
use std::collections::BTreeSet;
use std::marker::PhantomData;

/// One object type taking part in dumps.
pub trait Exporter: Send + Sync {
    /// Object type handled.
    fn object_type(&self) -> &str;

    /// Restore order; lower priorities are restored first.
    fn priority(&self) -> i32;

    /// Checks that an imported record is readable for this type.
    ///
    /// # Errors
    ///
    /// `Serialization` if the payload cannot be decoded.
    fn validate(&self, record: &Record) -> CoreResult<()>;
}

/// Exporter for a [`StoredObject`] type; validates payloads by decoding them.
pub struct TypedExporter<T> {
    priority: i32,
    _marker: PhantomData<fn() -> T>,
}

impl<T: StoredObject> TypedExporter<T> {
    /// Creates an exporter with the given priority.
    #[must_use]
    pub fn new(priority: i32) -> Self {
        Self {
            priority,
            _marker: PhantomData,
        }
    }
}

impl<T: StoredObject> Exporter for TypedExporter<T> {
    fn object_type(&self) -> &str {
        T::OBJECT_TYPE
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn validate(&self, record: &Record) -> CoreResult<()> {
        Stored::<T>::from_record(record).map(|_| ())
    }
}

/// Exporter for a type known only by name; accepts any JSON payload.
#[derive(Debug, Clone)]
pub struct RawExporter {
    object_type: String,
    priority: i32,
}

impl RawExporter {
    /// Creates an untyped exporter.
    pub fn new(object_type: impl Into<String>, priority: i32) -> Self {
        Self {
            object_type: object_type.into(),
            priority,
        }
    }
}

impl Exporter for RawExporter {
    fn object_type(&self) -> &str {
        &self.object_type
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn validate(&self, record: &Record) -> CoreResult<()> {
        payload_to_json(&record.contents)?;
        Ok(())
    }
}

/// Which object types to export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExportSelection {
    /// Every registered type.
    #[default]
    All,
    /// Only the named types.
    Only(BTreeSet<String>),
}

impl ExportSelection {
    /// Selects the given types.
    pub fn only<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(types.into_iter().map(Into::into).collect())
    }

    /// Returns true if `object_type` is selected.
    #[must_use]
    pub fn includes(&self, object_type: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(types) => types.contains(object_type),
        }
    }
}

/// Import settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Delete every registered type before loading.
    pub clear_existing: bool,
    /// Skip entries of unregistered types instead of failing.
    pub ignore_unknown_types: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            clear_existing: true,
            ignore_unknown_types: false,
        }
    }
}

impl ImportOptions {
    /// Keeps existing data; imported keys and names must not collide with it.
    #[must_use]
    pub const fn merge(mut self) -> Self {
        self.clear_existing = false;
        self
    }

    /// Sets whether unregistered types are skipped.
    #[must_use]
    pub const fn ignore_unknown_types(mut self, ignore: bool) -> Self {
        self.ignore_unknown_types = ignore;
        self
    }
}

/// Outcome of an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    /// Object types written.
    pub types: usize,
    /// Records written.
    pub records: usize,
    /// Checksum stored in the dump.
    pub checksum: String,
}

/// Outcome of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Format version of the input before upgrading.
    pub source_version: u32,
    /// Object types loaded.
    pub types: usize,
    /// Records loaded.
    pub records: usize,
    /// Records deleted before loading.
    pub cleared: u64,
    /// Unregistered types that were skipped.
    pub skipped_types: Vec<String>,
}

/// Description of a dump, produced without importing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpInfo {
    /// Format version of the input before upgrading.
    pub source_version: u32,
    /// Export time recorded in the dump.
    pub exported_at: u64,
    /// True if the dump carried a checksum (which then matched).
    pub checksummed: bool,
    /// Entries in restore order.
    pub entries: Vec<EntryInfo>,
}

/// One entry of a [`DumpInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Object type.
    pub object_type: String,
    /// Priority recorded in the dump.
    pub priority: i32,
    /// Number of records.
    pub records: usize,
    /// True if an exporter is registered for the type.
    pub registered: bool,
}
