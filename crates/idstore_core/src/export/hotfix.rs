//! In-place payload fixes.
//!
//! A [`RecordFix`] rewrites the JSON payload of every record of one object
//! type, for example after a field changed from a single value to a list.
//! Fixes must be idempotent: running one against already fixed data changes
//! nothing.

use crate::error::{CoreError, CoreResult};
use serde_json::Value;

/// Rewrites stored payloads of one object type.
pub trait RecordFix: Send + Sync {
    /// Object type whose records are rewritten.
    fn object_type(&self) -> &str;

    /// Short description used in logs.
    fn description(&self) -> String;

    /// Rewrites `contents` in place, returning true if anything changed.
    ///
    /// # Errors
    ///
    /// `Serialization` if the payload does not have the expected shape.
    fn apply(&self, contents: &mut Value) -> CoreResult<bool>;
}

/// Options for running a fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HotfixOptions {
    /// Log and skip records whose payload is malformed instead of failing.
    pub tolerate_malformed: bool,
}

impl HotfixOptions {
    /// Options that skip malformed records.
    #[must_use]
    pub fn tolerant() -> Self {
        Self {
            tolerate_malformed: true,
        }
    }
}

/// Outcome of a fix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotfixReport {
    /// Object type processed.
    pub object_type: String,
    /// Records looked at.
    pub examined: usize,
    /// Records rewritten.
    pub changed: usize,
    /// Malformed records left untouched.
    pub skipped: usize,
}

/// Wraps a legacy single value into a one-element array.
///
/// The path is a dot-separated list of field names; `*` walks every element
/// of an array (or every value of an object) at that position. For example
/// `requirements.*.credentials` turns
/// `{"requirements":[{"credentials":"password"}]}` into
/// `{"requirements":[{"credentials":["password"]}]}`.
///
/// Missing fields, `null` and values that already are arrays are left alone.
#[derive(Debug, Clone)]
pub struct ScalarToArrayFix {
    object_type: String,
    path: Vec<String>,
}

impl ScalarToArrayFix {
    /// Creates a fix for `object_type` at `path`.
    pub fn new(object_type: impl Into<String>, path: &str) -> Self {
        Self {
            object_type: object_type.into(),
            path: path.split('.').map(str::to_string).collect(),
        }
    }

    fn walk(&self, value: &mut Value, depth: usize) -> CoreResult<bool> {
        let segment = &self.path[depth];
        let last = depth + 1 == self.path.len();

        if segment == "*" {
            let children: Vec<&mut Value> = match value {
                Value::Array(items) => items.iter_mut().collect(),
                Value::Object(map) => map.values_mut().collect(),
                other => return Err(self.malformed(depth, other)),
            };
            let mut changed = false;
            for child in children {
                changed |= if last {
                    wrap(child)
                } else {
                    self.walk(child, depth + 1)?
                };
            }
            return Ok(changed);
        }

        let Value::Object(map) = value else {
            return Err(self.malformed(depth, value));
        };
        match map.get_mut(segment) {
            None => Ok(false),
            Some(child) if last => Ok(wrap(child)),
            Some(Value::Null) => Ok(false),
            Some(child) => self.walk(child, depth + 1),
        }
    }

    fn malformed(&self, depth: usize, found: &Value) -> CoreError {
        CoreError::serialization(format!(
            "expected a container at '{}', found {}",
            self.path[..depth].join("."),
            idstore_codec::kind(found)
        ))
    }
}

fn wrap(value: &mut Value) -> bool {
    match value {
        Value::Array(_) | Value::Null => false,
        other => {
            let scalar = other.take();
            *other = Value::Array(vec![scalar]);
            true
        }
    }
}

impl RecordFix for ScalarToArrayFix {
    fn object_type(&self) -> &str {
        &self.object_type
    }

    fn description(&self) -> String {
        format!("wrap single values at {} into arrays", self.path.join("."))
    }

    fn apply(&self, contents: &mut Value) -> CoreResult<bool> {
        if self.path.is_empty() || self.path.iter().any(String::is_empty) {
            return Err(CoreError::invalid_operation("empty path segment in fix"));
        }
        self.walk(contents, 0)
    }
}
