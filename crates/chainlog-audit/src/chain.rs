//! Hash-chain primitives: canonical serialization and record hashing.
//!
//! The canonical form of a record is compact JSON with object keys sorted
//! lexicographically at every depth. Key order therefore never depends on
//! how a payload map was populated, nor on whether serde_json was built
//! with `preserve_order`.
//!
//! Hashed fields (all of them, listed explicitly so nothing is omitted):
//!   1. schemaVersion
//!   2. kind (wire tag)
//!   3. subjectId
//!   4. payload (canonicalized recursively)
//!   5. producedAt
//!   6. previousRecordHash
//!
//! Service-assigned fields (`sequenceNumber`, `consensusTimestamp`) are
//! never hashed. The canonical bytes are also the wire form of a
//! single-part record.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use chainlog_contracts::record::AttestationRecord;

/// The JSON value whose canonical encoding is hashed for `record`.
fn hashed_value(record: &AttestationRecord) -> Value {
    json!({
        "schemaVersion": record.schema_version,
        "kind": record.kind.as_str(),
        "subjectId": record.subject_id,
        "payload": Value::Object(record.payload.clone()),
        "producedAt": record.produced_at,
        "previousRecordHash": record.previous_record_hash,
    })
}

/// Append the canonical encoding of `value` to `out`.
///
/// Scalars use serde_json's own compact formatting (string escaping and
/// shortest round-trip float output), which is deterministic.
pub fn write_canonical(value: &Value, out: &mut String) {
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

/// Canonical encoding of an arbitrary JSON value.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Canonical bytes of a record: what is hashed and what is sent.
pub fn canonical_bytes(record: &AttestationRecord) -> Vec<u8> {
    canonical_json(&hashed_value(record)).into_bytes()
}

/// Lowercase hex SHA-256 of `bytes`.
///
/// Use it to reference sensitive material (prompts, account data, model
/// weights) from a payload without putting the material itself on the log.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// The record hash: SHA-256 over the canonical bytes.
///
/// Returns a lowercase 64-character hex string.
pub fn record_hash(record: &AttestationRecord) -> String {
    sha256_hex(&canonical_bytes(record))
}

/// True for a 64-character lowercase hex string.
pub fn is_hash_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
