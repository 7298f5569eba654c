//! Attestation record types.
//!
//! An `AttestationRecord` is built client-side and chained to its
//! predecessor via `previous_record_hash`. Once the log service accepts it,
//! it is read back as a `LoggedRecord` carrying the service-assigned
//! `sequence_number` and `consensus_timestamp`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChainlogError;

/// The payload of a record: string keys mapped to arbitrary JSON values.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// The schema version stamped on every record built by this crate family.
pub const SCHEMA_VERSION: &str = "1.0";

/// The `previous_record_hash` carried by the first record of every chain.
///
/// 64 hex zeros.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Payload keys the log service assigns; a payload must never carry them.
pub const RESERVED_PAYLOAD_KEYS: &[&str] = &["sequenceNumber", "consensusTimestamp", "recordHash"];

/// Discriminates the shape of a record's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    /// A model or agent output (hashes of input and output).
    Output,
    /// A decision taken by an agent.
    Decision,
    /// A value transfer or other ledger transaction.
    Transaction,
    /// Provenance of a training dataset.
    TrainingData,
    /// A model version being deployed.
    ModelDeployment,
    /// Anything else; the payload is unconstrained.
    Custom,
}

impl RecordKind {
    /// All kinds, in declaration order.
    pub const ALL: [RecordKind; 6] = [
        RecordKind::Output,
        RecordKind::Decision,
        RecordKind::Transaction,
        RecordKind::TrainingData,
        RecordKind::ModelDeployment,
        RecordKind::Custom,
    ];

    /// The wire tag, e.g. `"MODEL_DEPLOYMENT"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Output => "OUTPUT",
            RecordKind::Decision => "DECISION",
            RecordKind::Transaction => "TRANSACTION",
            RecordKind::TrainingData => "TRAINING_DATA",
            RecordKind::ModelDeployment => "MODEL_DEPLOYMENT",
            RecordKind::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = ChainlogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ChainlogError::Validation {
                reason: format!("unrecognized record kind '{s}'"),
            })
    }
}

/// One structured entry in a subject's hash chain, as built by the client.
///
/// Every field contributes to the record hash. Service-assigned fields live
/// on `LoggedRecord` and never do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationRecord {
    /// Record format version, currently `SCHEMA_VERSION`.
    pub schema_version: String,

    /// What the payload describes.
    pub kind: RecordKind,

    /// The actor, agent or model producing the record.
    pub subject_id: String,

    /// Kind-specific content. Holds hashes or references of sensitive
    /// material, never the material itself.
    pub payload: Payload,

    /// Client clock in milliseconds since the Unix epoch. Advisory only.
    pub produced_at: i64,

    /// Hash of the preceding record of the same subject, or `GENESIS_HASH`.
    pub previous_record_hash: String,
}

impl AttestationRecord {
    /// True when this record opens a chain.
    pub fn is_genesis(&self) -> bool {
        self.previous_record_hash == GENESIS_HASH
    }
}

/// A record as read back from the log, with the fields the service assigned
/// when it committed the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedRecord {
    #[serde(flatten)]
    pub record: AttestationRecord,

    /// Position in the log. Strictly increasing, starts at 1.
    pub sequence_number: u64,

    /// Authoritative ordering timestamp assigned on commit.
    pub consensus_timestamp: DateTime<Utc>,
}

impl LoggedRecord {
    /// Shorthand for `self.record.subject_id`.
    pub fn subject_id(&self) -> &str {
        &self.record.subject_id
    }
}
