//! JSON Schema payload validation.
//!
//! `SchemaPayloadValidator` implements `PayloadValidator` from
//! `chainlog-core` so a `RecordBuilder` can reject ill-formed payloads
//! before anything is submitted. Schemas are compiled once at registration;
//! kinds without a schema are unconstrained.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::warn;

use chainlog_contracts::{
    error::{ChainlogError, ChainlogResult},
    record::{Payload, RecordKind},
};
use chainlog_core::traits::PayloadValidator;

/// Pattern every hash-valued payload field must match.
pub const HASH_PATTERN: &str = "^[0-9a-f]{64}$";

/// Per-kind JSON Schema validator.
pub struct SchemaPayloadValidator {
    validators: HashMap<RecordKind, jsonschema::Validator>,
}

impl SchemaPayloadValidator {
    /// A validator with no schemas registered.
    pub fn new() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    /// A validator with the built-in schema of every standard kind.
    /// `CUSTOM` stays unconstrained.
    pub fn with_builtin_schemas() -> ChainlogResult<Self> {
        let mut validator = Self::new();
        for kind in RecordKind::ALL {
            if let Some(schema) = builtin_schema(kind) {
                validator.register(kind, &schema)?;
            }
        }
        Ok(validator)
    }

    /// Compile `schema` and use it for `kind`, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// `ChainlogError::Config` when `schema` is not a valid JSON Schema.
    pub fn register(&mut self, kind: RecordKind, schema: &Value) -> ChainlogResult<()> {
        let compiled = jsonschema::validator_for(schema).map_err(|e| ChainlogError::Config {
            reason: format!("invalid JSON Schema for {kind}: {e}"),
        })?;
        self.validators.insert(kind, compiled);
        Ok(())
    }

    pub fn has_schema(&self, kind: RecordKind) -> bool {
        self.validators.contains_key(&kind)
    }
}

impl Default for SchemaPayloadValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadValidator for SchemaPayloadValidator {
    /// Collects every violation into one `Validation` error.
    fn validate(&self, kind: RecordKind, payload: &Payload) -> ChainlogResult<()> {
        let Some(validator) = self.validators.get(&kind) else {
            return Ok(());
        };

        let instance = Value::Object(payload.clone());
        let violations: Vec<String> = validator
            .iter_errors(&instance)
            .map(|error| {
                let path = error.instance_path.to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{path}: {error}")
                }
            })
            .collect();

        if violations.is_empty() {
            return Ok(());
        }

        warn!(kind = %kind, violations = violations.len(), "payload rejected by schema");
        Err(ChainlogError::Validation {
            reason: format!("{kind} payload does not match its schema: {}", violations.join("; ")),
        })
    }
}

/// The built-in schema for `kind`, if it has one.
pub fn builtin_schema(kind: RecordKind) -> Option<Value> {
    let hash = json!({ "type": "string", "pattern": HASH_PATTERN });
    let text = json!({ "type": "string", "minLength": 1 });

    let (required, properties) = match kind {
        RecordKind::Output => (
            vec!["modelId", "inputHash", "outputHash"],
            json!({ "modelId": text, "inputHash": hash, "outputHash": hash }),
        ),
        RecordKind::Decision => (vec!["decision"], json!({ "decision": text })),
        RecordKind::Transaction => (vec!["transactionId"], json!({ "transactionId": text })),
        RecordKind::TrainingData => (vec!["datasetHash"], json!({ "datasetHash": hash })),
        RecordKind::ModelDeployment => (
            vec!["modelId", "modelHash", "version"],
            json!({ "modelId": text, "modelHash": hash, "version": text }),
        ),
        RecordKind::Custom => return None,
    };

    Some(json!({
        "type": "object",
        "required": required,
        "properties": properties,
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use chainlog_audit::RecordBuilder;
    use chainlog_contracts::{
        error::ChainlogError,
        record::{Payload, RecordKind, GENESIS_HASH},
    };
    use chainlog_core::traits::PayloadValidator;

    use super::SchemaPayloadValidator;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn hash(byte: &str) -> String {
        byte.repeat(64)
    }

    #[test]
    fn builtin_schemas_accept_well_formed_payloads() {
        let v = SchemaPayloadValidator::with_builtin_schemas().unwrap();
        v.validate(
            RecordKind::Output,
            &payload(json!({ "modelId": "gpt-x", "inputHash": hash("a"), "outputHash": hash("b") })),
        )
        .unwrap();
        v.validate(RecordKind::Decision, &payload(json!({ "decision": "approve", "score": 0.93 })))
            .unwrap();
        v.validate(RecordKind::Transaction, &payload(json!({ "transactionId": "tx-1" })))
            .unwrap();
        v.validate(RecordKind::TrainingData, &payload(json!({ "datasetHash": hash("c") })))
            .unwrap();
        v.validate(
            RecordKind::ModelDeployment,
            &payload(json!({ "modelId": "m", "modelHash": hash("d"), "version": "1.2.0" })),
        )
        .unwrap();
    }

    #[test]
    fn custom_kind_is_unconstrained() {
        let v = SchemaPayloadValidator::with_builtin_schemas().unwrap();
        assert!(!v.has_schema(RecordKind::Custom));
        v.validate(RecordKind::Custom, &payload(json!({ "anything": [1, 2, 3] })))
            .unwrap();
    }

    #[test]
    fn all_violations_are_reported_together() {
        let v = SchemaPayloadValidator::with_builtin_schemas().unwrap();
        let err = v
            .validate(RecordKind::Output, &payload(json!({ "inputHash": "ABC" })))
            .unwrap_err();
        match err {
            ChainlogError::Validation { reason } => {
                assert!(reason.contains("modelId"), "{reason}");
                assert!(reason.contains("outputHash"), "{reason}");
                assert!(reason.contains("/inputHash"), "{reason}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_schema_is_a_config_error() {
        let mut v = SchemaPayloadValidator::new();
        let err = v
            .register(RecordKind::Custom, &json!({ "type": "not-a-type" }))
            .unwrap_err();
        assert!(matches!(err, ChainlogError::Config { .. }));
    }

    #[test]
    fn builder_runs_the_validator() {
        let builder = RecordBuilder::with_validator(Box::new(SchemaPayloadValidator::with_builtin_schemas().unwrap()));
        assert!(builder
            .build(RecordKind::Decision, "agent-1", json!({ "score": 1 }), GENESIS_HASH)
            .is_err());
        assert!(builder
            .build(RecordKind::Decision, "agent-1", json!({ "decision": "deny" }), GENESIS_HASH)
            .is_ok());
    }
}
