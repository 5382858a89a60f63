//! CBOR helpers used for on-disk snapshots.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Encodes a value as CBOR bytes.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    to_cbor_writer(value, &mut out)?;
    Ok(out)
}

/// Encodes a value as CBOR into a writer.
pub fn to_cbor_writer<T: Serialize + ?Sized, W: Write>(value: &T, writer: W) -> CodecResult<()> {
    ciborium::into_writer(value, writer).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Decodes a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    from_cbor_reader(bytes)
}

/// Decodes a value from a CBOR reader.
pub fn from_cbor_reader<T: DeserializeOwned, R: Read>(reader: R) -> CodecResult<T> {
    ciborium::from_reader(reader).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        key: i64,
        name: Option<String>,
        contents: Vec<u8>,
    }

    #[test]
    fn row_survives_cbor() {
        let row = Row {
            key: 7,
            name: Some("/".into()),
            contents: b"{}".to_vec(),
        };
        let bytes = to_cbor(&row).unwrap();
        assert_eq!(from_cbor::<Row>(&bytes).unwrap(), row);
    }

    #[test]
    fn truncated_input_is_decoding_error() {
        let bytes = to_cbor(&vec![1u32, 2, 3]).unwrap();
        let err = from_cbor::<Vec<u32>>(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::DecodingFailed { .. }));
    }
}
