//! Content hashing for payloads, bundles and plans.
//!
//! Hashes are computed over a canonical JSON rendering (object keys sorted
//! recursively, no insignificant whitespace), so two payloads that differ only
//! in key order or formatting hash identically.

use serde_json::Value;
use sha2::{Digest, Sha256};

pub const HASH_PREFIX: &str = "sha256:";

/// Canonical JSON text for `value`.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // String serialization cannot fail.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// `sha256:<hex>` of arbitrary bytes.
pub fn digest_bytes(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("{HASH_PREFIX}{digest:x}")
}

/// Content hash of a payload as stored on `RemoteObjectRecord`.
pub fn content_hash(payload: &Value) -> String {
    digest_bytes(canonical_json(payload).as_bytes())
}

/// Copy of `payload` without the given top-level fields.
///
/// Remote APIs echo server-assigned fields (ids, timestamps) that never
/// appear in templates; they are removed before hashing live objects.
pub fn strip_fields(payload: &Value, fields: &[String]) -> Value {
    match payload {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !fields.iter().any(|f| f == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Hash of a live remote payload, ignoring volatile fields.
pub fn live_hash(payload: &Value, volatile_fields: &[String]) -> String {
    content_hash(&strip_fields(payload, volatile_fields))
}
