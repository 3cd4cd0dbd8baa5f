//! Canonical encoding, entry hashes and Merkle batch roots.
//!
//! An entry hash is `SHA-256(canonical(entry without hash) ‖ previous_hash)`,
//! hex encoded. The canonical form is compact JSON with object keys sorted
//! at every depth, so it is independent of map insertion order and of
//! serde_json's `preserve_order` feature.

use kyc_storage::AuditEntryRecord;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// `previous_hash` of the first entry in every chain. 64 hex zeros, which is
/// never the digest of real data.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Compact JSON with keys sorted lexicographically at every level.
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

/// Canonical bytes of every hashed field of an entry, excluding `hash` and
/// `previous_hash`.
pub fn canonical_entry(record: &AuditEntryRecord) -> String {
    canonical_json(&json!({
        "id": record.id,
        "chain_id": record.chain_id,
        "subject": record.subject,
        "sequence": record.sequence,
        "event_type": record.event_type,
        "severity": record.severity,
        "user_id": record.user_id,
        "timestamp": record.timestamp,
        "event_data": record.event_data,
    }))
}

/// Hash an entry from its stored fields and its *recorded* previous hash.
pub fn entry_hash(record: &AuditEntryRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_entry(record).as_bytes());
    hasher.update(record.previous_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 over the ordered concatenation of a batch's hex hashes.
pub fn merkle_root<S: AsRef<str>>(hashes: &[S]) -> String {
    let mut hasher = Sha256::new();
    for h in hashes {
        hasher.update(h.as_ref().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// One root per consecutive batch of `batch_size` hashes; the last batch may
/// be short. A zero batch size is treated as one batch over everything.
pub fn batch_roots<S: AsRef<str>>(hashes: &[S], batch_size: usize) -> Vec<String> {
    if hashes.is_empty() {
        return Vec::new();
    }
    let size = if batch_size == 0 { hashes.len() } else { batch_size };
    hashes.chunks(size).map(|batch| merkle_root(batch)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AuditEntryRecord {
        AuditEntryRecord {
            id: "e1".into(),
            chain_id: "c1".into(),
            subject: "workflow:w1".into(),
            sequence: 0,
            event_type: "WorkflowInitialized".into(),
            severity: "Info".into(),
            user_id: "u1".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            event_data: json!({"b": 1, "a": {"z": true, "y": [2, 1]}}),
            hash: String::new(),
            previous_hash: GENESIS_HASH.into(),
        }
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let v = json!({"b": 1, "a": {"z": null, "y": "s"}});
        assert_eq!(canonical_json(&v), r#"{"a":{"y":"s","z":null},"b":1}"#);
    }

    #[test]
    fn canonical_json_escapes_keys() {
        let v = json!({"q\"k": 1});
        assert_eq!(canonical_json(&v), r#"{"q\"k":1}"#);
    }

    #[test]
    fn entry_hash_is_stable_hex() {
        let h = entry_hash(&record());
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, entry_hash(&record()));
    }

    #[test]
    fn entry_hash_covers_data_and_link() {
        let base = entry_hash(&record());

        let mut r = record();
        r.event_data = json!({"b": 2, "a": {"z": true, "y": [2, 1]}});
        assert_ne!(entry_hash(&r), base);

        let mut r = record();
        r.previous_hash = "1".repeat(64);
        assert_ne!(entry_hash(&r), base);

        // the stored hash itself is not an input
        let mut r = record();
        r.hash = "ff".into();
        assert_eq!(entry_hash(&r), base);
    }

    #[test]
    fn batch_roots_chunk_in_order() {
        let hashes = vec!["a", "b", "c", "d", "e"];
        let roots = batch_roots(&hashes, 2);
        assert_eq!(roots.len(), 3);
        assert_eq!(roots[0], merkle_root(&["a", "b"]));
        assert_eq!(roots[2], merkle_root(&["e"]));
        assert_ne!(merkle_root(&["a", "b"]), merkle_root(&["b", "a"]));
        assert_eq!(batch_roots(&hashes, 0), vec![merkle_root(&hashes)]);
        assert!(batch_roots::<&str>(&[], 4).is_empty());
    }
}
