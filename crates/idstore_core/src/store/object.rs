//! Stored object types and their typed view.

use crate::error::{CoreError, CoreResult};
use idstore_codec::CodecResult;
use idstore_storage::Record;

/// A type that can be kept in a [`crate::GenericRecordStore`].
///
/// Implementations provide explicit encode and decode functions, usually
/// through the JSON helpers in `idstore_codec`. `Clone` must produce a deep
/// copy: cached stores hand out clones and never shared references.
///
/// # Example
///
/// ```rust
/// use idstore_codec::{from_json_bytes, to_json_bytes, CodecResult};
/// use idstore_core::StoredObject;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Realm {
///     name: String,
///     max_inactivity: u32,
/// }
///
/// impl StoredObject for Realm {
///     const OBJECT_TYPE: &'static str = "realm";
///
///     fn name(&self) -> Option<&str> {
///         Some(&self.name)
///     }
///
///     fn encode(&self) -> CodecResult<Vec<u8>> {
///         to_json_bytes(self)
///     }
///
///     fn decode(bytes: &[u8]) -> CodecResult<Self> {
///         from_json_bytes(bytes)
///     }
/// }
/// ```
pub trait StoredObject: Clone + Send + Sync + 'static {
    /// Object type name, unique across the registry.
    const OBJECT_TYPE: &'static str;

    /// Unique name of this object, if the type is addressed by name.
    fn name(&self) -> Option<&str>;

    /// Serializes the payload.
    fn encode(&self) -> CodecResult<Vec<u8>>;

    /// Deserializes a payload.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

/// A typed object together with its storage metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
    /// Surrogate key.
    pub key: i64,
    /// Unique name, if any.
    pub name: Option<String>,
    /// Revision, incremented on every update.
    pub revision: i64,
    /// Last modification time in milliseconds since the UNIX epoch.
    pub updated_at: u64,
    /// The decoded object.
    pub value: T,
}

impl<T: StoredObject> Stored<T> {
    /// Decodes a raw record.
    ///
    /// # Errors
    ///
    /// `Serialization` if the record belongs to another type or its payload
    /// does not decode.
    pub fn from_record(record: &Record) -> CoreResult<Self> {
        if record.object_type != T::OBJECT_TYPE {
            return Err(CoreError::serialization(format!(
                "record #{} is a {}, not a {}",
                record.key,
                record.object_type,
                T::OBJECT_TYPE
            )));
        }
        let value = T::decode(&record.contents).map_err(|e| {
            CoreError::serialization(format!("{} #{}: {e}", T::OBJECT_TYPE, record.key))
        })?;
        Ok(Self {
            key: record.key,
            name: record.name.clone(),
            revision: record.revision,
            updated_at: record.updated_at,
            value,
        })
    }
}
