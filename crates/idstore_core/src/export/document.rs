//! The JSON dump document.
//!
//! ```json
//! {
//!   "formatVersion": 1,
//!   "exportedAt": 1700000000000,
//!   "checksum": "9f86d0...",
//!   "entries": [
//!     { "objectType": "credential", "priority": 10,
//!       "records": [ { "key": 1, "name": "password", "revision": 0,
//!                      "updatedAt": 1700000000000, "contents": { } } ] }
//!   ]
//! }
//! ```
//!
//! The checksum is the lowercase hex SHA-256 of the compact JSON encoding of
//! `entries`.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Newest dump format this build writes and reads.
pub const FORMAT_VERSION: u32 = 1;

/// A complete dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    /// Dump format version.
    pub format_version: u32,
    /// Export time in milliseconds since the UNIX epoch.
    pub exported_at: u64,
    /// SHA-256 of the entries; absent in hand-written or upgraded dumps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Entries in ascending priority.
    pub entries: Vec<ExportEntry>,
}

/// All records of one object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEntry {
    /// Object type.
    pub object_type: String,
    /// Restore order; lower priorities are restored first.
    pub priority: i32,
    /// Records ordered by key.
    pub records: Vec<ExportedRecord>,
}

/// One exported record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedRecord {
    /// Surrogate key.
    pub key: i64,
    /// Unique name, if any.
    #[serde(default)]
    pub name: Option<String>,
    /// Revision at export time.
    #[serde(default)]
    pub revision: i64,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: u64,
    /// The payload as JSON.
    pub contents: Value,
}

impl ExportDocument {
    /// Builds a document and seals it with a checksum.
    pub fn sealed(exported_at: u64, entries: Vec<ExportEntry>) -> CoreResult<Self> {
        let checksum = checksum(&entries)?;
        Ok(Self {
            format_version: FORMAT_VERSION,
            exported_at,
            checksum: Some(checksum),
            entries,
        })
    }

    /// Checks the checksum, if the document carries one.
    ///
    /// # Errors
    ///
    /// `Serialization` on mismatch.
    pub fn verify_checksum(&self) -> CoreResult<()> {
        let Some(expected) = &self.checksum else {
            return Ok(());
        };
        let actual = checksum(&self.entries)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(CoreError::serialization(format!(
                "dump checksum mismatch: document says {expected}, contents hash to {actual}"
            )));
        }
        Ok(())
    }

    /// Total number of records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.entries.iter().map(|e| e.records.len()).sum()
    }

    /// Sorts entries by ascending priority, ties broken by type name.
    pub fn sort_entries(&mut self) {
        self.entries.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.object_type.cmp(&b.object_type))
        });
    }
}

/// Hex SHA-256 over the compact JSON encoding of `entries`.
pub fn checksum(entries: &[ExportEntry]) -> CoreResult<String> {
    let bytes = serde_json::to_vec(entries)?;
    Ok(Sha256::digest(&bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}
