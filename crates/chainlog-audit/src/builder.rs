//! Record Builder.
//!
//! Turns a kind, a subject, a payload and the previous record's hash into a
//! well-formed `AttestationRecord` plus its hash. The builder performs no
//! I/O: the caller threads the previous hash, typically through a
//! `ChainTip`.

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use chainlog_contracts::{
    error::{ChainlogError, ChainlogResult},
    record::{AttestationRecord, RecordKind, GENESIS_HASH, RESERVED_PAYLOAD_KEYS, SCHEMA_VERSION},
};
use chainlog_core::traits::PayloadValidator;

use crate::chain::{is_hash_hex, record_hash};

/// Key fragments that mark a raw secret. Matched case-insensitively against
/// payload keys at any depth, ignoring `_` and `-`. Keys ending in `hash`
/// (e.g. `passwordHash`) are references and pass.
const SECRET_KEY_MARKERS: &[&str] = &["privatekey", "secret", "password", "mnemonic", "seedphrase"];

/// A record ready for submission, with its hash.
///
/// `record_hash` is never transmitted; it seeds the next record's
/// `previous_record_hash`.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRecord {
    pub record: AttestationRecord,
    pub record_hash: String,
}

/// Builds validated attestation records.
pub struct RecordBuilder {
    validator: Option<Box<dyn PayloadValidator>>,
}

impl RecordBuilder {
    /// A builder applying only the structural checks.
    pub fn new() -> Self {
        Self { validator: None }
    }

    /// A builder that also runs `validator` on every payload.
    pub fn with_validator(validator: Box<dyn PayloadValidator>) -> Self {
        Self {
            validator: Some(validator),
        }
    }

    /// Build a record stamped with the current wall-clock time.
    pub fn build(
        &self,
        kind: RecordKind,
        subject_id: &str,
        payload: Value,
        previous_hash: &str,
    ) -> ChainlogResult<BuiltRecord> {
        self.build_at(kind, subject_id, payload, previous_hash, Utc::now().timestamp_millis())
    }

    /// Build a record from a wire kind tag such as `"DECISION"`.
    pub fn build_tagged(
        &self,
        kind_tag: &str,
        subject_id: &str,
        payload: Value,
        previous_hash: &str,
    ) -> ChainlogResult<BuiltRecord> {
        let kind: RecordKind = kind_tag.parse()?;
        self.build(kind, subject_id, payload, previous_hash)
    }

    /// Build a record with an explicit `produced_at` (milliseconds since epoch).
    ///
    /// # Errors
    ///
    /// `ChainlogError::Validation` when the payload is not a JSON object, the
    /// subject is blank, the payload uses a reserved or secret-looking key,
    /// `previous_hash` is not a hash, or the configured validator objects.
    pub fn build_at(
        &self,
        kind: RecordKind,
        subject_id: &str,
        payload: Value,
        previous_hash: &str,
        produced_at: i64,
    ) -> ChainlogResult<BuiltRecord> {
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                return Err(ChainlogError::Validation {
                    reason: format!("payload must be a JSON object, got {}", json_type(&other)),
                })
            }
        };

        let record = AttestationRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            kind,
            subject_id: subject_id.to_string(),
            payload,
            produced_at,
            previous_record_hash: previous_hash.to_string(),
        };

        validate_record(&record)?;
        if let Some(validator) = &self.validator {
            validator.validate(record.kind, &record.payload)?;
        }

        let record_hash = record_hash(&record);
        debug!(
            subject_id = %record.subject_id,
            kind = %record.kind,
            record_hash = %record_hash,
            genesis = record.is_genesis(),
            "record built"
        );

        Ok(BuiltRecord { record, record_hash })
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural checks every record must pass before submission.
///
/// Shared by the builder and the submitter, which may be handed a record
/// built elsewhere.
pub fn validate_record(record: &AttestationRecord) -> ChainlogResult<()> {
    if record.subject_id.trim().is_empty() {
        return Err(ChainlogError::Validation {
            reason: "subject id must not be empty".to_string(),
        });
    }

    if !is_hash_hex(&record.previous_record_hash) {
        return Err(ChainlogError::Validation {
            reason: format!(
                "previous record hash for subject '{}' must be 64 lowercase hex characters",
                record.subject_id
            ),
        });
    }

    for key in RESERVED_PAYLOAD_KEYS {
        if record.payload.contains_key(*key) {
            return Err(ChainlogError::Validation {
                reason: format!("payload key '{key}' is reserved for the log service"),
            });
        }
    }

    for (key, value) in &record.payload {
        check_secret_keys(key, value)?;
    }

    Ok(())
}

fn check_secret_keys(key: &str, value: &Value) -> ChainlogResult<()> {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    if !normalized.ends_with("hash")
        && SECRET_KEY_MARKERS.iter().any(|marker| normalized.contains(marker))
    {
        return Err(ChainlogError::Validation {
            reason: format!("payload key '{key}' looks like a raw secret; store a hash or reference instead"),
        });
    }

    check_nested_keys(value)
}

fn check_nested_keys(value: &Value) -> ChainlogResult<()> {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                check_secret_keys(k, v)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                check_nested_keys(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The caller's view of the end of one subject's chain.
///
/// Starts at the genesis sentinel; advance it only after the record it
/// describes has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub subject_id: String,
    pub head_hash: String,
}

impl ChainTip {
    /// A tip for a subject with no records yet.
    pub fn genesis(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            head_hash: GENESIS_HASH.to_string(),
        }
    }

    /// A tip continuing from a known head hash.
    pub fn at(subject_id: impl Into<String>, head_hash: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            head_hash: head_hash.into(),
        }
    }

    /// Build the next record of this chain. Does not advance the tip.
    pub fn next(
        &self,
        builder: &RecordBuilder,
        kind: RecordKind,
        payload: Value,
    ) -> ChainlogResult<BuiltRecord> {
        builder.build(kind, &self.subject_id, payload, &self.head_hash)
    }

    /// Move the tip past a committed record.
    pub fn advance(&mut self, built: &BuiltRecord) {
        self.head_hash = built.record_hash.clone();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use chainlog_contracts::{
        error::{ChainlogError, ChainlogResult},
        record::{Payload, RecordKind, GENESIS_HASH},
    };
    use chainlog_core::traits::PayloadValidator;

    use super::{ChainTip, RecordBuilder};
    use crate::chain::record_hash;

    fn assert_validation(result: ChainlogResult<super::BuiltRecord>, needle: &str) {
        match result {
            Err(ChainlogError::Validation { reason }) => {
                assert!(reason.contains(needle), "reason '{reason}' should mention '{needle}'")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn builds_genesis_record_with_hash() {
        let builder = RecordBuilder::new();
        let built = builder
            .build_at(RecordKind::Custom, "agent-1", json!({ "action": "login" }), GENESIS_HASH, 1_000)
            .unwrap();

        assert_eq!(built.record.schema_version, "1.0");
        assert_eq!(built.record.produced_at, 1_000);
        assert!(built.record.is_genesis());
        assert_eq!(built.record_hash, record_hash(&built.record));
    }

    #[test]
    fn build_tagged_rejects_unknown_kind() {
        let builder = RecordBuilder::new();
        assert_validation(
            builder.build_tagged("HEARTBEAT", "agent-1", json!({}), GENESIS_HASH),
            "HEARTBEAT",
        );
        assert!(builder
            .build_tagged("DECISION", "agent-1", json!({ "decision": "approve" }), GENESIS_HASH)
            .is_ok());
    }

    #[test]
    fn empty_subject_is_rejected() {
        let builder = RecordBuilder::new();
        assert_validation(builder.build(RecordKind::Custom, "", json!({}), GENESIS_HASH), "subject");
        assert_validation(builder.build(RecordKind::Custom, "   ", json!({}), GENESIS_HASH), "subject");
    }

    #[test]
    fn reserved_payload_keys_are_rejected() {
        let builder = RecordBuilder::new();
        for key in ["sequenceNumber", "consensusTimestamp", "recordHash"] {
            let mut payload = Payload::new();
            payload.insert(key.to_string(), json!(1));
            assert_validation(
                builder.build(RecordKind::Custom, "agent-1", payload.into(), GENESIS_HASH),
                key,
            );
        }
    }

    #[test]
    fn secret_looking_keys_are_rejected_at_any_depth() {
        let builder = RecordBuilder::new();
        assert_validation(
            builder.build(RecordKind::Custom, "agent-1", json!({ "private_key": "302e..." }), GENESIS_HASH),
            "private_key",
        );
        assert_validation(
            builder.build(
                RecordKind::Custom,
                "agent-1",
                json!({ "wallet": { "Mnemonic": "abandon abandon" } }),
                GENESIS_HASH,
            ),
            "Mnemonic",
        );
        assert_validation(
            builder.build(
                RecordKind::Custom,
                "agent-1",
                json!({ "signers": [{ "apiSecret": "x" }] }),
                GENESIS_HASH,
            ),
            "apiSecret",
        );
        // A hash of the secret is fine.
        assert!(builder
            .build(RecordKind::Custom, "agent-1", json!({ "keyFingerprint": "abc" }), GENESIS_HASH)
            .is_ok());
        assert!(builder
            .build(RecordKind::Custom, "agent-1", json!({ "passwordHash": "9f86d0" }), GENESIS_HASH)
            .is_ok());
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let builder = RecordBuilder::new();
        assert_validation(
            builder.build(RecordKind::Custom, "agent-1", json!(["login"]), GENESIS_HASH),
            "an array",
        );
    }

    #[test]
    fn malformed_previous_hash_is_rejected() {
        let builder = RecordBuilder::new();
        assert_validation(
            builder.build(RecordKind::Custom, "agent-1", json!({}), "not-a-hash"),
            "previous record hash",
        );
        assert_validation(
            builder.build(RecordKind::Custom, "agent-1", json!({}), &"AB".repeat(32)),
            "previous record hash",
        );
    }

    struct RejectAll;

    impl PayloadValidator for RejectAll {
        fn validate(&self, kind: RecordKind, _payload: &Payload) -> ChainlogResult<()> {
            Err(ChainlogError::Validation {
                reason: format!("no {kind} payloads today"),
            })
        }
    }

    #[test]
    fn configured_validator_runs_after_structural_checks() {
        let builder = RecordBuilder::with_validator(Box::new(RejectAll));
        assert_validation(
            builder.build(RecordKind::Decision, "agent-1", json!({}), GENESIS_HASH),
            "no DECISION payloads",
        );
        // Structural failures are reported first.
        assert_validation(builder.build(RecordKind::Decision, "", json!({}), GENESIS_HASH), "subject");
    }

    #[test]
    fn chain_tip_threads_previous_hash() {
        let builder = RecordBuilder::new();
        let mut tip = ChainTip::genesis("agent-1");
        assert_eq!(tip.head_hash, GENESIS_HASH);

        let first = tip.next(&builder, RecordKind::Custom, json!({ "action": "login" })).unwrap();
        tip.advance(&first);
        let second = tip
            .next(&builder, RecordKind::Custom, json!({ "action": "transfer", "amount": 10 }))
            .unwrap();

        assert_eq!(second.record.previous_record_hash, first.record_hash);
        assert_eq!(second.record.subject_id, "agent-1");
    }
}
