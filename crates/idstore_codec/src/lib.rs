//! # idstore Codec
//!
//! Explicit codec helpers for idstore.
//!
//! Stored object types encode themselves through these functions instead of
//! relying on reflection: record payloads are compact JSON, the file-backed
//! provider's snapshot is CBOR.
//!
//! ## Usage
//!
//! ```
//! use idstore_codec::{from_json_bytes, to_json_bytes};
//!
//! let bytes = to_json_bytes(&vec!["password", "otp"]).unwrap();
//! let decoded: Vec<String> = from_json_bytes(&bytes).unwrap();
//! assert_eq!(decoded, vec!["password", "otp"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod json;

pub use cbor::{from_cbor, from_cbor_reader, to_cbor, to_cbor_writer};
pub use error::{CodecError, CodecResult};
pub use json::{
    from_json_bytes, json_to_payload, kind, payload_to_json, payload_to_object, to_json_bytes,
};
