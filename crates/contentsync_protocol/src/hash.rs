//! Canonical encoding and content hashing.

use crate::error::{ProtocolError, ProtocolResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Encodes a value to CBOR bytes.
///
/// Maps inside operations are `BTreeMap`s, so equal values always encode to
/// identical bytes.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| ProtocolError::encoding_failed(e.to_string()))?;
    Ok(bytes)
}

/// SHA-256 over the CBOR encoding of `value`, as lowercase hex.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> ProtocolResult<String> {
    let bytes = to_cbor(value)?;
    let digest = Sha256::digest(&bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}
