//! Dump format upgrades.
//!
//! A dump older than [`FORMAT_VERSION`] is passed through a chain of
//! [`DumpUpdate`]s, each lifting the raw JSON by one version, before it is
//! parsed as an [`ExportDocument`].

use crate::error::{CoreError, CoreResult};
use crate::export::document::{ExportDocument, FORMAT_VERSION};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Priority given to legacy object types no exporter is registered for.
pub const UNKNOWN_TYPE_PRIORITY: i32 = i32::MAX;

/// Information available to updates.
#[derive(Debug, Clone, Default)]
pub struct UpdateContext {
    priorities: BTreeMap<String, i32>,
}

impl UpdateContext {
    /// Creates a context from the registered exporter priorities.
    #[must_use]
    pub fn new(priorities: BTreeMap<String, i32>) -> Self {
        Self { priorities }
    }

    /// Priority of a registered object type.
    #[must_use]
    pub fn priority_of(&self, object_type: &str) -> Option<i32> {
        self.priorities.get(object_type).copied()
    }
}

/// Lifts a raw dump from `source_version()` to the next version.
pub trait DumpUpdate: Send + Sync {
    /// Version this update reads.
    fn source_version(&self) -> u32;

    /// Rewrites the document; the result must carry a higher `formatVersion`.
    fn update(&self, document: Value, ctx: &UpdateContext) -> CoreResult<Value>;
}

/// Converts the legacy flat layout into the entries layout.
///
/// Version 0 dumps keep every object in one list:
///
/// ```json
/// { "contents": { "genericObjects": [
///     { "type": "credential", "name": "password", "id": 3, "contents": { } }
/// ] } }
/// ```
///
/// Objects are grouped by type, in order of first appearance, and each group
/// takes the priority of the registered exporter for that type. String
/// payloads holding JSON text are parsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyLayoutUpdate;

impl DumpUpdate for LegacyLayoutUpdate {
    fn source_version(&self) -> u32 {
        0
    }

    fn update(&self, document: Value, ctx: &UpdateContext) -> CoreResult<Value> {
        let Value::Object(mut root) = document else {
            return Err(CoreError::serialization("legacy dump is not a JSON object"));
        };
        let generics = match root.get_mut("contents") {
            Some(Value::Object(contents)) => contents.remove("genericObjects"),
            Some(_) => return Err(CoreError::serialization("legacy dump 'contents' is not an object")),
            None => None,
        };
        let generics = match generics {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(CoreError::serialization("'genericObjects' is not an array")),
            None => Vec::new(),
        };

        let mut order: Vec<String> = Vec::new();
        let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for item in generics {
            let Value::Object(item) = item else {
                return Err(CoreError::serialization("legacy object is not a JSON object"));
            };
            let object_type = required_str(&item, "type")?.to_string();
            let record = legacy_record(&item)?;
            if !groups.contains_key(&object_type) {
                order.push(object_type.clone());
            }
            groups.entry(object_type).or_default().push(record);
        }

        let entries: Vec<Value> = order
            .into_iter()
            .map(|object_type| {
                let priority = ctx.priority_of(&object_type).unwrap_or_else(|| {
                    warn!(object_type, "legacy dump holds an unregistered object type");
                    UNKNOWN_TYPE_PRIORITY
                });
                let records = groups.remove(&object_type).unwrap_or_default();
                json!({ "objectType": object_type, "priority": priority, "records": records })
            })
            .collect();

        let exported_at = root
            .get("timestamp")
            .or_else(|| root.get("exportedAt"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(json!({
            "formatVersion": 1,
            "exportedAt": exported_at,
            "entries": entries,
        }))
    }
}

fn required_str<'a>(item: &'a Map<String, Value>, field: &str) -> CoreResult<&'a str> {
    item.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::serialization(format!("legacy object without '{field}'")))
}

fn legacy_record(item: &Map<String, Value>) -> CoreResult<Value> {
    let key = item
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| CoreError::serialization("legacy object without numeric 'id'"))?;
    let name = item.get("name").and_then(Value::as_str);
    let contents = match item.get("contents") {
        Some(Value::String(text)) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
        }
        Some(other) => other.clone(),
        None => Value::Object(Map::new()),
    };
    Ok(json!({ "key": key, "name": name, "revision": 0, "updatedAt": 0, "contents": contents }))
}

/// Reads `formatVersion`; documents without one are version 0.
pub fn version_of(document: &Value) -> CoreResult<u32> {
    match document.get("formatVersion") {
        None => Ok(0),
        Some(v) => v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| CoreError::serialization(format!("invalid formatVersion {v}"))),
    }
}

/// Applies updates until the document reaches [`FORMAT_VERSION`], then parses it.
///
/// # Errors
///
/// `UnsupportedFormat` if the document is newer than this build or no update
/// handles one of the intermediate versions.
pub fn upgrade(
    mut document: Value,
    updates: &[Arc<dyn DumpUpdate>],
    ctx: &UpdateContext,
) -> CoreResult<ExportDocument> {
    let mut version = version_of(&document)?;
    if version > FORMAT_VERSION {
        return Err(CoreError::UnsupportedFormat {
            found: version,
            supported: FORMAT_VERSION,
        });
    }

    while version < FORMAT_VERSION {
        let update = updates
            .iter()
            .find(|u| u.source_version() == version)
            .ok_or(CoreError::UnsupportedFormat {
                found: version,
                supported: FORMAT_VERSION,
            })?;
        document = update.update(document, ctx)?;
        let next = version_of(&document)?;
        if next <= version {
            return Err(CoreError::serialization(format!(
                "update from format {version} did not advance the version"
            )));
        }
        info!(from = version, to = next, "dump format upgraded");
        version = next;
    }

    Ok(serde_json::from_value(document)?)
}
