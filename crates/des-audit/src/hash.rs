//! Record integrity hashing.
//!
//! Records are canonicalized with JCS (RFC 8785) before hashing so the
//! hash is independent of key order and whitespace. The range hash over
//! a window of records is SHA-256 of the member hashes concatenated in
//! order.

use serde_json::Value;
use sha2::{Digest, Sha256};

use des_utils::error::AuditError;

use crate::event::AuditRecord;

/// Canonical (RFC 8785) JSON bytes for a value.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, AuditError> {
    serde_json_canonicalizer::to_vec(value).map_err(|e| AuditError::Canonicalize(e.to_string()))
}

/// Hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Content hash for a record value that does not yet carry `content_hash`.
pub fn content_hash_for(value: &Value) -> Result<String, AuditError> {
    debug_assert!(
        value.get("content_hash").is_none(),
        "hash input must not contain content_hash"
    );
    Ok(sha256_hex(&canonical_bytes(value)?))
}

/// Hash a record, ignoring any `content_hash` it already carries.
pub fn hash_record(record: &AuditRecord) -> Result<String, AuditError> {
    let mut value =
        serde_json::to_value(record).map_err(|e| AuditError::Canonicalize(e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.remove("content_hash");
    }
    content_hash_for(&value)
}

/// SHA-256 over the concatenation of member content hashes, in order.
#[must_use]
pub fn range_hash<'a>(hashes: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for h in hashes {
        hasher.update(h.as_bytes());
    }
    hex::encode(hasher.finalize())
}
