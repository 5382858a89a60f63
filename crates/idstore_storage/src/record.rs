//! Stored row type.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A single stored object as seen by the storage layer.
///
/// `contents` is opaque to storage; the core layer owns its encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Surrogate key, immutable once assigned.
    pub key: i64,
    /// Optional name, unique within `object_type`.
    pub name: Option<String>,
    /// Object type this record belongs to.
    pub object_type: String,
    /// Serialized payload.
    pub contents: Vec<u8>,
    /// Revision counter, starts at 0 and grows by one on every update.
    pub revision: i64,
    /// Last modification time in milliseconds since the UNIX epoch.
    pub updated_at: u64,
}

impl Record {
    /// Creates a fresh record at revision 0, stamped with the current time.
    #[must_use]
    pub fn new(
        object_type: impl Into<String>,
        key: i64,
        name: Option<String>,
        contents: Vec<u8>,
    ) -> Self {
        Self {
            key,
            name,
            object_type: object_type.into(),
            contents,
            revision: 0,
            updated_at: now_millis(),
        }
    }

    /// Returns a copy carrying new contents and name, with the revision bumped
    /// and the timestamp refreshed.
    #[must_use]
    pub fn next_revision(&self, name: Option<String>, contents: Vec<u8>) -> Self {
        Self {
            key: self.key,
            name,
            object_type: self.object_type.clone(),
            contents,
            revision: self.revision + 1,
            updated_at: now_millis(),
        }
    }
}

/// Current time in milliseconds since the UNIX epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_at_revision_zero() {
        let record = Record::new("credential", 3, Some("pass".into()), vec![1]);
        assert_eq!(record.revision, 0);
        assert_eq!(record.key, 3);
        assert!(record.updated_at > 0);
    }

    #[test]
    fn next_revision_keeps_key_and_type() {
        let record = Record::new("credential", 3, Some("pass".into()), vec![1]);
        let updated = record.next_revision(Some("pass2".into()), vec![2]);
        assert_eq!(updated.key, 3);
        assert_eq!(updated.object_type, "credential");
        assert_eq!(updated.revision, 1);
        assert_eq!(updated.name.as_deref(), Some("pass2"));
        assert_eq!(updated.contents, vec![2]);
    }
}
