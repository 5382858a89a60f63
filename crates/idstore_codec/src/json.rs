//! JSON helpers.
//!
//! Record payloads are stored as compact UTF-8 JSON. Objects are backed by
//! `serde_json`'s default ordered map, so re-encoding a decoded value yields
//! the same bytes.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Encodes a value as compact JSON bytes.
pub fn to_json_bytes<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Decodes a value from JSON bytes.
pub fn from_json_bytes<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Parses a stored payload into a generic JSON value.
pub fn payload_to_json(bytes: &[u8]) -> CodecResult<Value> {
    from_json_bytes(bytes)
}

/// Serializes a generic JSON value into a stored payload.
pub fn json_to_payload(value: &Value) -> CodecResult<Vec<u8>> {
    to_json_bytes(value)
}

/// Decodes a payload and checks that it is a JSON object.
pub fn payload_to_object(bytes: &[u8]) -> CodecResult<serde_json::Map<String, Value>> {
    match payload_to_json(bytes)? {
        Value::Object(map) => Ok(map),
        other => Err(CodecError::invalid_structure(format!(
            "expected a JSON object, found {}",
            kind(&other)
        ))),
    }
}

/// Short name of a JSON value's kind, for error messages.
#[must_use]
pub fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Credential {
        name: String,
        max_age: u32,
    }

    #[test]
    fn typed_payload() {
        let value = Credential {
            name: "password".into(),
            max_age: 30,
        };
        let bytes = to_json_bytes(&value).unwrap();
        assert_eq!(bytes, br#"{"name":"password","max_age":30}"#.to_vec());
        assert_eq!(from_json_bytes::<Credential>(&bytes).unwrap(), value);
    }

    #[test]
    fn malformed_payload_is_decoding_error() {
        let err = from_json_bytes::<Credential>(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::DecodingFailed { .. }));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err = payload_to_object(b"[1,2]").unwrap_err();
        assert_eq!(
            err,
            CodecError::invalid_structure("expected a JSON object, found array")
        );
    }

    #[test]
    fn reencoding_sorts_object_keys() {
        let bytes = json_to_payload(&json!({"b": 1, "a": 2})).unwrap();
        assert_eq!(bytes, br#"{"a":2,"b":1}"#.to_vec());
    }

    proptest! {
        #[test]
        fn decoded_payload_reencodes_identically(
            entries in prop::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..8)
        ) {
            let first = to_json_bytes(&entries).unwrap();
            let value = payload_to_json(&first).unwrap();
            prop_assert_eq!(json_to_payload(&value).unwrap(), first);
        }
    }
}
