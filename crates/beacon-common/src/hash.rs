//! Deterministic fingerprints of specs.
//!
//! A fingerprint is a change marker: two specs that serialize to the same
//! canonical JSON always share a fingerprint. Comparison is exact string
//! equality; semantically equivalent but differently written specs are
//! different on purpose, since the marker detects regeneration and not drift.

use std::collections::BTreeMap;
use std::fmt::Write;

use aws_lc_rs::digest::{digest, SHA256};
use serde::Serialize;
use serde_json::Value;

use crate::Error;

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 for stability across Rust toolchain versions.
/// `DefaultHasher` is NOT guaranteed stable across releases, and these
/// values are persisted in pod annotations.
pub fn deterministic_hash(input: &str) -> String {
    let hash = digest(&SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Render a JSON value with object keys sorted at every level.
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> = map
                .iter()
                .map(|(k, v)| (k, to_canonical_json(v)))
                .collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", items.join(","))
        }
        scalar => scalar.to_string(),
    }
}

/// Fingerprint any serializable value.
///
/// The value is rendered to canonical JSON first, so the hash depends only
/// on the value and never on map insertion order.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String, Error> {
    let value = serde_json::to_value(value)
        .map_err(|e| Error::serialization(format!("failed to fingerprint value: {}", e)))?;
    Ok(deterministic_hash(&to_canonical_json(&value)))
}
