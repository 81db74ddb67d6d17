//! Canonical JSON rendering and content-hash versions.
//!
//! Canonical form: object keys sorted, strings trimmed, arrays kept in
//! order. Two values that differ only in key order or surrounding
//! whitespace in strings render to the same byte sequence, so hashes over
//! the canonical form are stable identifiers for *content*.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively normalizes a JSON value into canonical form.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.trim().to_string(), canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        other => other.clone(),
    }
}

/// Renders a value to its canonical JSON string.
pub fn canonical_json(value: &Value) -> String {
    // BTreeMap ordering survives serde_json serialization as-is.
    serde_json::to_string(&canonicalize(value)).unwrap_or_else(|_| "null".to_string())
}

/// Hex-encoded SHA-256 over an arbitrary string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content version: first 16 hex chars of SHA-256 over canonical JSON.
///
/// Changes iff the canonical content changes.
pub fn content_version(value: &Value) -> String {
    sha256_hex(&canonical_json(value))[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_canonical_form() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(content_version(&a), content_version(&b));
    }

    #[test]
    fn string_whitespace_is_trimmed() {
        let a = json!({"name": "  招牌鍋貼 "});
        let b = json!({"name": "招牌鍋貼"});
        assert_eq!(content_version(&a), content_version(&b));
    }

    #[test]
    fn version_changes_with_content() {
        let a = json!(["加辣"]);
        let b = json!(["加辣", "SMOKE_MARKER"]);
        assert_ne!(content_version(&a), content_version(&b));
        assert_eq!(content_version(&a).len(), 16);
    }
}
