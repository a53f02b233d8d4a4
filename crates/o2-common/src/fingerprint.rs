//! Fingerprints of desired and observed remote state
//!
//! The backend echoes extra server-side fields (ids, timestamps, owners) on
//! every read. The observed object is first projected onto the keys of the
//! desired payload so only fields the operator manages take part in the
//! comparison.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 for stability across Rust toolchain versions.
pub fn deterministic_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

/// Fingerprint of a JSON payload, independent of object key order
pub fn fingerprint(value: &Value) -> String {
    deterministic_hash(&canonical(value).to_string())
}

/// Keep only the parts of `observed` that `desired` specifies
///
/// Objects are projected key by key; a key missing from `observed` becomes
/// `null`. Arrays of equal length are projected element-wise, otherwise the
/// observed array is kept whole so the length difference shows.
pub fn project(desired: &Value, observed: &Value) -> Value {
    match (desired, observed) {
        (Value::Object(want), Value::Object(have)) => {
            let projected: Map<String, Value> = want
                .iter()
                .map(|(k, v)| {
                    let observed_field = have.get(k).unwrap_or(&Value::Null);
                    (k.clone(), project(v, observed_field))
                })
                .collect();
            Value::Object(projected)
        }
        (Value::Array(want), Value::Array(have)) if want.len() == have.len() => Value::Array(
            want.iter()
                .zip(have.iter())
                .map(|(w, h)| project(w, h))
                .collect(),
        ),
        _ => observed.clone(),
    }
}

/// Whether the observed remote object already matches the desired payload
pub fn matches_remote(desired: &Value, observed: &Value) -> bool {
    fingerprint(desired) == fingerprint(&project(desired, observed))
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_16_hex_chars_and_stable() {
        let h = deterministic_hash("hello");
        assert_eq!(h.len(), 16);
        assert_eq!(h, deterministic_hash("hello"));
        assert_ne!(h, deterministic_hash("hello!"));
        // first 8 bytes of sha256("hello")
        assert_eq!(h, "2cf24dba5fb0a30e");
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = json!({"name": "cpu", "enabled": true, "nested": {"x": 1, "y": 2}});
        let b = json!({"nested": {"y": 2, "x": 1}, "enabled": true, "name": "cpu"});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_server_side_fields_do_not_count_as_drift() {
        let desired = json!({"name": "cpu", "enabled": true});
        let observed = json!({
            "name": "cpu",
            "enabled": true,
            "id": "7a1c",
            "updated_at": 1700000000,
            "owner": "root@example.com"
        });
        assert!(matches_remote(&desired, &observed));
    }

    #[test]
    fn test_changed_field_is_drift() {
        let desired = json!({"name": "cpu", "enabled": true});
        let observed = json!({"name": "cpu", "enabled": false});
        assert!(!matches_remote(&desired, &observed));
    }

    #[test]
    fn test_missing_remote_field_is_drift() {
        let desired = json!({"name": "cpu", "destinations": ["a"]});
        let observed = json!({"name": "cpu"});
        assert!(!matches_remote(&desired, &observed));
    }

    #[test]
    fn test_array_length_change_is_drift() {
        let desired = json!({"destinations": ["a", "b"]});
        let observed = json!({"destinations": ["a"]});
        assert!(!matches_remote(&desired, &observed));

        let observed = json!({"destinations": [{"name": "a", "id": 1}, {"name": "b", "id": 2}]});
        let desired = json!({"destinations": [{"name": "a"}, {"name": "b"}]});
        assert!(matches_remote(&desired, &observed));
    }
}
