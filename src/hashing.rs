//! Hashing - SHA-256 Fingerprints for Cached Values
//!
//! A cache entry carries the fingerprint of its value, taken when the entry is
//! sealed. On read the value has been through a tier's serializer and back,
//! and is fingerprinted again; the two must agree for the entry to be served.
//! Any map inside the value (a `HashMap` field, or `serde_json` built with
//! `preserve_order`) may come back with its keys in another order, so the
//! fingerprint is taken over a canonical encoding: object keys sorted at every
//! depth, no whitespace, array order kept. Two processes that render the same
//! fragment concurrently also produce identical fingerprints, whichever one's
//! write lands last.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`. Also names durable cache files.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Canonical JSON text of `value`.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    write_canonical(&serde_json::to_value(value)?, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(item, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        leaf => out.push_str(&serde_json::to_string(leaf)?),
    }
    Ok(())
}

/// Fingerprint stored in and checked against a cache entry.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}
