//! Chain verifier for attestation logs.
//!
//! `ChainVerifier` walks one subject's records in the order given (the
//! log's order; it never reorders) and reports every discontinuity:
//!
//! 1. **Linkage**: `previousRecordHash` must equal the recomputed hash of
//!    the preceding record, or the genesis sentinel for the first one.
//! 2. **Ordering**: sequence numbers strictly increase and consensus
//!    timestamps never go backwards.
//! 3. **Anchor** (optional): the last record's hash equals a head hash the
//!    caller obtained out of band.
//!
//! Raw sequence gaps are not findings: other subjects interleave in the
//! same log, and a missing record of this subject already surfaces as a
//! linkage break.
//!
//! A broken chain is a result, not an error. All breaks are collected
//! unless `stop_at_first_break` is set.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use chainlog_audit::chain::record_hash;
use chainlog_contracts::{
    error::{ChainlogError, ChainlogResult},
    record::{AttestationRecord, LoggedRecord, GENESIS_HASH},
    verify::{BreakReason, ChainBreak, VerificationReport},
};

/// Verifier settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Stop after the first break instead of auditing the whole sequence.
    pub stop_at_first_break: bool,
    /// Expected hash of the last record, when the caller knows it.
    pub expected_head: Option<String>,
}

/// The chain verification state machine.
#[derive(Debug, Clone, Default)]
pub struct ChainVerifier {
    options: VerifyOptions,
}

impl ChainVerifier {
    /// A verifier that collects every break.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: VerifyOptions) -> Self {
        Self { options }
    }

    /// Verify `records` as one chain.
    ///
    /// The caller is responsible for having restricted `records` to a single
    /// subject; see `verify_subject` and `verify_by_subject`.
    pub fn verify(&self, records: &[LoggedRecord]) -> VerificationReport {
        let subject_id = records.first().map(|r| r.record.subject_id.clone());
        let mut breaks: Vec<ChainBreak> = Vec::new();

        let mut expected_prev = GENESIS_HASH.to_string();
        // After a linkage break at record i: the hash record i would have had
        // with a correct link. A successor linking to it is not a new break.
        let mut repaired_prev: Option<String> = None;
        let mut previous: Option<&LoggedRecord> = None;
        let mut examined = 0usize;

        for logged in records {
            examined += 1;
            let at_sequence = logged.sequence_number;

            if let Some(prev) = previous {
                if logged.sequence_number <= prev.sequence_number {
                    breaks.push(ChainBreak {
                        at_sequence,
                        reason: BreakReason::SequenceNotIncreasing,
                        expected: format!("> {}", prev.sequence_number),
                        observed: logged.sequence_number.to_string(),
                    });
                }
                if logged.consensus_timestamp < prev.consensus_timestamp {
                    breaks.push(ChainBreak {
                        at_sequence,
                        reason: BreakReason::TimestampRegressed,
                        expected: format!(">= {}", prev.consensus_timestamp.to_rfc3339()),
                        observed: logged.consensus_timestamp.to_rfc3339(),
                    });
                }
            }

            let this_hash = record_hash(&logged.record);
            let observed_prev = &logged.record.previous_record_hash;
            let linked = *observed_prev == expected_prev || repaired_prev.as_ref() == Some(observed_prev);

            if linked {
                repaired_prev = None;
            } else {
                warn!(
                    subject_id = %logged.record.subject_id,
                    sequence = at_sequence,
                    expected = %expected_prev,
                    observed = %observed_prev,
                    "chain break"
                );
                breaks.push(ChainBreak {
                    at_sequence,
                    reason: BreakReason::PreviousHashMismatch,
                    expected: expected_prev.clone(),
                    observed: observed_prev.clone(),
                });
                let repaired = AttestationRecord {
                    previous_record_hash: expected_prev.clone(),
                    ..logged.record.clone()
                };
                repaired_prev = Some(record_hash(&repaired));
            }

            expected_prev = this_hash;
            previous = Some(logged);

            if self.options.stop_at_first_break && !breaks.is_empty() {
                break;
            }
        }

        let head_hash = previous.map(|_| expected_prev.clone());

        let stopped_early = self.options.stop_at_first_break && !breaks.is_empty();
        if let (Some(anchor), Some(head), Some(last), false) =
            (&self.options.expected_head, &head_hash, previous, stopped_early)
        {
            if anchor != head {
                breaks.push(ChainBreak {
                    at_sequence: last.sequence_number,
                    reason: BreakReason::HeadMismatch,
                    expected: anchor.clone(),
                    observed: head.clone(),
                });
            }
        }

        debug!(
            subject_id = ?subject_id,
            record_count = examined,
            break_count = breaks.len(),
            "chain verification complete"
        );

        VerificationReport {
            subject_id,
            valid: breaks.is_empty(),
            breaks,
            record_count: examined,
            head_hash,
        }
    }

    /// Verify the chain of `subject_id` inside a log that may interleave
    /// several subjects.
    pub fn verify_subject(&self, records: &[LoggedRecord], subject_id: &str) -> VerificationReport {
        let filtered: Vec<LoggedRecord> = records
            .iter()
            .filter(|r| r.record.subject_id == subject_id)
            .cloned()
            .collect();
        let mut report = self.verify(&filtered);
        report.subject_id = Some(subject_id.to_string());
        report
    }

    /// Verify every subject present in `records`, each as its own chain.
    pub fn verify_by_subject(&self, records: &[LoggedRecord]) -> BTreeMap<String, VerificationReport> {
        let mut by_subject: BTreeMap<String, Vec<LoggedRecord>> = BTreeMap::new();
        for record in records {
            by_subject
                .entry(record.record.subject_id.clone())
                .or_default()
                .push(record.clone());
        }
        by_subject
            .into_iter()
            .map(|(subject, chain)| {
                let report = self.verify(&chain);
                (subject, report)
            })
            .collect()
    }

    /// Parse an exported log (a JSON array of logged records) and verify it.
    ///
    /// With `subject_id` the records are filtered first; without it they
    /// are treated as a single chain.
    ///
    /// # Errors
    ///
    /// `ChainlogError::MalformedRecord` when the document is not a JSON
    /// array or an entry does not parse as a logged record. A broken chain
    /// is reported through the returned report, never as an error.
    pub fn verify_json(&self, bytes: &[u8], subject_id: Option<&str>) -> ChainlogResult<VerificationReport> {
        let records = parse_export(bytes)?;
        Ok(match subject_id {
            Some(subject) => self.verify_subject(&records, subject),
            None => self.verify(&records),
        })
    }
}

/// Parse an exported JSON array of logged records.
pub fn parse_export(bytes: &[u8]) -> ChainlogResult<Vec<LoggedRecord>> {
    let entries: Vec<Value> = serde_json::from_slice(bytes).map_err(|e| ChainlogError::MalformedRecord {
        log_id: "export".to_string(),
        sequence: None,
        reason: format!("export is not a JSON array: {e}"),
    })?;

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let sequence = entry.get("sequenceNumber").and_then(Value::as_u64);
            serde_json::from_value::<LoggedRecord>(entry).map_err(|e| ChainlogError::MalformedRecord {
                log_id: "export".to_string(),
                sequence,
                reason: format!("entry {index}: {e}"),
            })
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use chainlog_audit::{BuiltRecord, ChainTip, RecordBuilder};
    use chainlog_contracts::{
        error::ChainlogError,
        record::{LoggedRecord, RecordKind, GENESIS_HASH},
        verify::BreakReason,
    };

    use super::{ChainVerifier, VerifyOptions};

    // ── Builder helpers ───────────────────────────────────────────────────────

    /// Log `built` at `sequence`, one second per sequence number.
    fn logged(built: &BuiltRecord, sequence: u64) -> LoggedRecord {
        LoggedRecord {
            record: built.record.clone(),
            sequence_number: sequence,
            consensus_timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(sequence as i64),
        }
    }

    /// A correctly threaded chain of `n` records for `subject`, at the
    /// given sequence numbers.
    fn chain(subject: &str, sequences: &[u64]) -> Vec<LoggedRecord> {
        let builder = RecordBuilder::new();
        let mut tip = ChainTip::genesis(subject);
        sequences
            .iter()
            .enumerate()
            .map(|(i, seq)| {
                let built = builder
                    .build_at(RecordKind::Custom, subject, json!({ "step": i }), &tip.head_hash, 1_000 + i as i64)
                    .unwrap();
                tip.advance(&built);
                logged(&built, *seq)
            })
            .collect()
    }

    fn random_hash() -> String {
        "5a".repeat(32)
    }

    // ── Valid chains ──────────────────────────────────────────────────────────

    #[test]
    fn valid_chain_has_no_breaks() {
        for n in [1usize, 2, 5, 30] {
            let seqs: Vec<u64> = (1..=n as u64).collect();
            let report = ChainVerifier::new().verify(&chain("agent-1", &seqs));
            assert!(report.valid, "chain of {n} must verify");
            assert!(report.breaks.is_empty());
            assert_eq!(report.record_count, n);
        }
    }

    #[test]
    fn empty_chain_is_valid() {
        let report = ChainVerifier::new().verify(&[]);
        assert!(report.valid);
        assert_eq!(report.record_count, 0);
        assert_eq!(report.head_hash, None);
        assert_eq!(report.subject_id, None);
    }

    #[test]
    fn head_hash_is_last_record_hash() {
        let records = chain("agent-1", &[1, 2, 3]);
        let report = ChainVerifier::new().verify(&records);
        assert_eq!(
            report.head_hash.as_deref(),
            Some(chainlog_audit::record_hash(&records[2].record).as_str())
        );
    }

    /// The two-record scenario: login, then transfer.
    #[test]
    fn login_then_transfer_scenario() {
        let builder = RecordBuilder::new();
        let first = builder
            .build(RecordKind::Custom, "agent-1", json!({ "action": "login" }), GENESIS_HASH)
            .unwrap();
        let second = builder
            .build(
                RecordKind::Custom,
                "agent-1",
                json!({ "action": "transfer", "amount": 10 }),
                &first.record_hash,
            )
            .unwrap();
        let mut records = vec![logged(&first, 1), logged(&second, 2)];

        let report = ChainVerifier::new().verify(&records);
        assert!(report.valid);
        assert_eq!(report.record_count, 2);
        assert!(report.breaks.is_empty());

        // Tamper: rewrite record 2's link to a random value.
        records[1].record.previous_record_hash = random_hash();
        let report = ChainVerifier::new().verify(&records);
        assert!(!report.valid);
        assert_eq!(report.record_count, 2);
        assert_eq!(report.breaks.len(), 1);
        let brk = &report.breaks[0];
        assert_eq!(brk.at_sequence, 2);
        assert_eq!(brk.reason, BreakReason::PreviousHashMismatch);
        assert_eq!(brk.expected, first.record_hash);
        assert_eq!(brk.observed, random_hash());
    }

    // ── Tampering ─────────────────────────────────────────────────────────────

    /// Mutating exactly one link yields exactly one break, wherever it is.
    #[test]
    fn single_mutated_link_yields_exactly_one_break() {
        let n = 8u64;
        let seqs: Vec<u64> = (1..=n).collect();
        for victim in 0..n as usize {
            let mut records = chain("agent-1", &seqs);
            let original = records[victim].record.previous_record_hash.clone();
            records[victim].record.previous_record_hash = random_hash();

            let report = ChainVerifier::new().verify(&records);
            assert!(!report.valid);
            assert_eq!(report.breaks.len(), 1, "victim {victim}");
            let brk = &report.breaks[0];
            assert_eq!(brk.at_sequence, victim as u64 + 1);
            assert_eq!(brk.expected, original);
            assert_eq!(brk.observed, random_hash());
            assert_ne!(brk.expected, brk.observed);
        }
    }

    /// Rewriting a payload breaks the successor's link.
    #[test]
    fn payload_tamper_is_detected_at_successor() {
        let mut records = chain("agent-1", &[1, 2, 3]);
        records[1].record.payload.insert("step".into(), json!(99));

        let report = ChainVerifier::new().verify(&records);
        assert_eq!(report.breaks.len(), 1);
        assert_eq!(report.breaks[0].at_sequence, 3);
    }

    #[test]
    fn missing_record_is_a_break() {
        let mut records = chain("agent-1", &[1, 2, 3, 4]);
        records.remove(1);
        let report = ChainVerifier::new().verify(&records);
        assert_eq!(report.breaks.len(), 1);
        assert_eq!(report.breaks[0].at_sequence, 3);
    }

    #[test]
    fn genesis_must_carry_sentinel() {
        let mut records = chain("agent-1", &[1, 2, 3]);
        records.remove(0);
        let report = ChainVerifier::new().verify(&records);
        assert!(!report.valid);
        assert_eq!(report.breaks[0].at_sequence, 2);
        assert_eq!(report.breaks[0].expected, GENESIS_HASH);
    }

    #[test]
    fn collects_all_breaks_by_default_and_stops_when_asked() {
        let mut records = chain("agent-1", &[1, 2, 3, 4, 5]);
        records[1].record.previous_record_hash = random_hash();
        records[3].record.previous_record_hash = random_hash();

        let report = ChainVerifier::new().verify(&records);
        assert_eq!(report.breaks.len(), 2);
        assert_eq!(report.record_count, 5);

        let verifier = ChainVerifier::with_options(VerifyOptions {
            stop_at_first_break: true,
            ..Default::default()
        });
        let report = verifier.verify(&records);
        assert_eq!(report.breaks.len(), 1);
        assert_eq!(report.breaks[0].at_sequence, 2);
        assert_eq!(report.record_count, 2);
    }

    // ── Ordering ──────────────────────────────────────────────────────────────

    #[test]
    fn non_increasing_sequence_is_a_break() {
        let mut records = chain("agent-1", &[1, 2, 3]);
        records[2].sequence_number = 2;
        let report = ChainVerifier::new().verify(&records);
        assert_eq!(report.breaks.len(), 1);
        assert_eq!(report.breaks[0].reason, BreakReason::SequenceNotIncreasing);
    }

    #[test]
    fn timestamp_regression_is_a_break() {
        let mut records = chain("agent-1", &[1, 2, 3]);
        records[2].consensus_timestamp = records[0].consensus_timestamp - Duration::seconds(1);
        let report = ChainVerifier::new().verify(&records);
        assert_eq!(report.breaks.len(), 1);
        assert_eq!(report.breaks[0].reason, BreakReason::TimestampRegressed);
        assert_eq!(report.breaks[0].at_sequence, 3);
    }

    #[test]
    fn equal_timestamps_are_allowed() {
        let mut records = chain("agent-1", &[1, 2]);
        records[1].consensus_timestamp = records[0].consensus_timestamp;
        assert!(ChainVerifier::new().verify(&records).valid);
    }

    #[test]
    fn sequence_gaps_from_interleaving_are_not_breaks() {
        let records = chain("agent-1", &[1, 4, 9, 10]);
        assert!(ChainVerifier::new().verify(&records).valid);
    }

    // ── Subjects ──────────────────────────────────────────────────────────────

    fn interleaved() -> Vec<LoggedRecord> {
        let a = chain("agent-a", &[1, 3, 5]);
        let b = chain("agent-b", &[2, 4, 6]);
        let mut all: Vec<LoggedRecord> = a.into_iter().chain(b).collect();
        all.sort_by_key(|r| r.sequence_number);
        all
    }

    #[test]
    fn interleaved_subjects_verify_per_subject() {
        let all = interleaved();
        let verifier = ChainVerifier::new();

        // Checking adjacency in the raw stream would be wrong.
        assert!(!verifier.verify(&all).valid);

        let report = verifier.verify_subject(&all, "agent-a");
        assert!(report.valid);
        assert_eq!(report.record_count, 3);
        assert_eq!(report.subject_id.as_deref(), Some("agent-a"));

        let reports = verifier.verify_by_subject(&all);
        assert_eq!(reports.len(), 2);
        assert!(reports.values().all(|r| r.valid && r.record_count == 3));
    }

    #[test]
    fn unknown_subject_yields_empty_valid_report() {
        let report = ChainVerifier::new().verify_subject(&interleaved(), "agent-z");
        assert!(report.valid);
        assert_eq!(report.record_count, 0);
        assert_eq!(report.subject_id.as_deref(), Some("agent-z"));
    }

    // ── Anchor ────────────────────────────────────────────────────────────────

    #[test]
    fn head_anchor_catches_tampered_last_record() {
        let mut records = chain("agent-1", &[1, 2, 3]);
        let head = chainlog_audit::record_hash(&records[2].record);
        let verifier = ChainVerifier::with_options(VerifyOptions {
            expected_head: Some(head.clone()),
            ..Default::default()
        });
        assert!(verifier.verify(&records).valid);

        records[2].record.payload.insert("step".into(), json!("forged"));
        // Without the anchor the last record's payload is unverifiable.
        assert!(ChainVerifier::new().verify(&records).valid);

        let report = verifier.verify(&records);
        assert_eq!(report.breaks.len(), 1);
        assert_eq!(report.breaks[0].reason, BreakReason::HeadMismatch);
        assert_eq!(report.breaks[0].expected, head);
    }

    // ── Exported JSON ─────────────────────────────────────────────────────────

    #[test]
    fn verify_json_round_trips_an_export() {
        let records = chain("agent-1", &[1, 2, 3]);
        let bytes = serde_json::to_vec(&records).unwrap();
        let report = ChainVerifier::new().verify_json(&bytes, Some("agent-1")).unwrap();
        assert!(report.valid);
        assert_eq!(report.record_count, 3);
    }

    #[test]
    fn verify_json_rejects_unparsable_entries() {
        let records = chain("agent-1", &[1, 2]);
        let mut value = serde_json::to_value(&records).unwrap();
        value[1]["kind"] = json!("NOT_A_KIND");
        let bytes = serde_json::to_vec(&value).unwrap();

        match ChainVerifier::new().verify_json(&bytes, None) {
            Err(ChainlogError::MalformedRecord { sequence, .. }) => assert_eq!(sequence, Some(2)),
            other => panic!("expected malformed record, got {other:?}"),
        }

        assert!(matches!(
            ChainVerifier::new().verify_json(b"{\"not\":\"an array\"}", None),
            Err(ChainlogError::MalformedRecord { .. })
        ));
    }
}
