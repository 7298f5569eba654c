//! Chain verification findings.
//!
//! A broken chain is a normal, reportable result. These types describe what
//! the verifier found; they are never raised as errors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a record does not continue its subject's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakReason {
    /// `previousRecordHash` does not match the hash of the preceding record
    /// (or the genesis sentinel for the first record).
    PreviousHashMismatch,
    /// The sequence number did not increase.
    SequenceNotIncreasing,
    /// The consensus timestamp went backwards.
    TimestampRegressed,
    /// The last record's hash differs from the caller-supplied head anchor.
    HeadMismatch,
    /// A message on the log could not be decoded, so it cannot be ruled out
    /// as a rewritten record of this chain.
    UnreadableRecord,
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakReason::PreviousHashMismatch => "previous hash mismatch",
            BreakReason::SequenceNotIncreasing => "sequence number not increasing",
            BreakReason::TimestampRegressed => "consensus timestamp regressed",
            BreakReason::HeadMismatch => "head hash mismatch",
            BreakReason::UnreadableRecord => "unreadable record",
        };
        f.write_str(s)
    }
}

/// A detected discontinuity in a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainBreak {
    /// Sequence number of the record where the chain breaks.
    pub at_sequence: u64,
    pub reason: BreakReason,
    /// What the verifier expected to see.
    pub expected: String,
    /// What the record actually carries.
    pub observed: String,
}

impl fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sequence {}: {} (expected {}, observed {})",
            self.at_sequence, self.reason, self.expected, self.observed
        )
    }
}

/// The outcome of verifying one subject's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// The subject the records were filtered to, when known.
    pub subject_id: Option<String>,
    /// True only if `breaks` is empty.
    pub valid: bool,
    /// Every break found, in sequence order.
    pub breaks: Vec<ChainBreak>,
    /// Number of records examined.
    pub record_count: usize,
    /// Hash of the last record examined, to seed the next record.
    pub head_hash: Option<String>,
}
