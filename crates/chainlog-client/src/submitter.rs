//! Submission of attestation records to an append-only log.
//!
//! A record whose canonical bytes fit in one message is submitted as is.
//! Larger records are rejected or split into a chunk group, per
//! `ChunkingConfig::oversize`. Chunks go out sequentially in index order and
//! the record counts as committed with the receipt of the last chunk sent.
//!
//! Failure reporting keeps three cases apart:
//!
//! - nothing committed: `Submission`
//! - some chunks committed, the rest known not to be: `PartialSubmission`,
//!   which `resume_chunks` can finish under the same group id
//! - the deadline passed with a call unanswered: `AmbiguousSubmission`; the
//!   record may or may not be on the log, and only a fetch can tell

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chainlog_audit::{
    builder::validate_record,
    chain::canonical_bytes,
    chunk::{chunk_capacity, chunk_count, split, Chunk},
};
use chainlog_contracts::{
    error::{ChainlogError, ChainlogResult, LogServiceError},
    log::{LogHandle, SubmitReceipt},
    record::{AttestationRecord, LoggedRecord},
};
use chainlog_core::{
    config::{ClientConfig, OversizePolicy},
    traits::AppendOnlyLog,
};

use crate::retry::{call_with_retry, RetryOutcome};

/// Submits records, retrying transient service failures.
///
/// Holds no durable state; clones share the same service.
pub struct Submitter<L: AppendOnlyLog + ?Sized> {
    service: Arc<L>,
    config: ClientConfig,
}

impl<L: AppendOnlyLog + ?Sized> Clone for Submitter<L> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            config: self.config.clone(),
        }
    }
}

impl<L: AppendOnlyLog + ?Sized> Submitter<L> {
    pub fn new(service: Arc<L>, config: ClientConfig) -> Self {
        Self { service, config }
    }

    /// Submit `record` under the configured submit deadline.
    pub async fn submit(&self, log: &LogHandle, record: &AttestationRecord) -> ChainlogResult<LoggedRecord> {
        let deadline = Instant::now() + self.config.deadlines.submit();
        self.submit_by(log, record, deadline).await
    }

    /// Submit `record`, giving up at `deadline`.
    ///
    /// # Errors
    ///
    /// - `Validation` when the record is structurally invalid
    /// - `PayloadTooLarge` when it exceeds the message size under the
    ///   `reject` policy, or needs more than `max_chunks` chunks
    /// - `Submission`, `PartialSubmission`, `AmbiguousSubmission` and
    ///   `DeadlineExceeded` as described in the module docs
    pub async fn submit_by(
        &self,
        log: &LogHandle,
        record: &AttestationRecord,
        deadline: Instant,
    ) -> ChainlogResult<LoggedRecord> {
        validate_record(record)?;
        let bytes = canonical_bytes(record);
        let max_message_bytes = self.config.chunking.max_message_bytes;

        if bytes.len() <= max_message_bytes {
            return self.submit_single(log, record, bytes, deadline).await;
        }

        match self.config.chunking.oversize {
            OversizePolicy::Reject => Err(ChainlogError::PayloadTooLarge {
                size: bytes.len(),
                limit: max_message_bytes,
            }),
            OversizePolicy::Chunk => {
                self.check_chunk_limit(bytes.len())?;
                let group_id = Uuid::new_v4();
                let chunks = split(group_id, &bytes, max_message_bytes);
                info!(
                    log_id = %log.log_id,
                    subject_id = %record.subject_id,
                    group_id = %group_id,
                    size = bytes.len(),
                    chunks = chunks.len(),
                    "submitting record as chunk group"
                );
                self.submit_chunks(log, record, group_id, chunks, Vec::new(), deadline)
                    .await
            }
        }
    }

    /// Finish a partially submitted chunk group.
    ///
    /// `record` is re-split deterministically under `group_id` and only the
    /// indices missing from `landed` are sent. Pass the `group_id` and
    /// `landed` carried by the `PartialSubmission` error.
    pub async fn resume_chunks(
        &self,
        log: &LogHandle,
        record: &AttestationRecord,
        group_id: Uuid,
        landed: &[u16],
        deadline: Instant,
    ) -> ChainlogResult<LoggedRecord> {
        validate_record(record)?;
        let bytes = canonical_bytes(record);
        let max_message_bytes = self.config.chunking.max_message_bytes;
        if bytes.len() <= max_message_bytes {
            return Err(ChainlogError::Validation {
                reason: format!(
                    "record of {} bytes fits in one message and was never chunked",
                    bytes.len()
                ),
            });
        }
        self.check_chunk_limit(bytes.len())?;

        let chunks = split(group_id, &bytes, max_message_bytes);
        let total = chunks.len();
        if let Some(bad) = landed.iter().find(|i| usize::from(**i) >= total) {
            return Err(ChainlogError::Validation {
                reason: format!("landed chunk index {bad} out of range for a group of {total}"),
            });
        }
        if chunks.iter().all(|c| landed.contains(&c.index)) {
            return Err(ChainlogError::Validation {
                reason: format!("all {total} chunks of group {group_id} already landed"),
            });
        }

        info!(
            log_id = %log.log_id,
            subject_id = %record.subject_id,
            group_id = %group_id,
            landed = landed.len(),
            total,
            "resuming chunk group"
        );
        self.submit_chunks(log, record, group_id, chunks, landed.to_vec(), deadline)
            .await
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    fn check_chunk_limit(&self, size: usize) -> ChainlogResult<()> {
        let chunking = &self.config.chunking;
        if chunk_count(size, chunking.max_message_bytes) > usize::from(chunking.max_chunks) {
            return Err(ChainlogError::PayloadTooLarge {
                size,
                limit: chunk_capacity(chunking.max_message_bytes) * usize::from(chunking.max_chunks),
            });
        }
        Ok(())
    }

    async fn submit_single(
        &self,
        log: &LogHandle,
        record: &AttestationRecord,
        bytes: Vec<u8>,
        deadline: Instant,
    ) -> ChainlogResult<LoggedRecord> {
        let service = &*self.service;
        let outcome = call_with_retry(&self.config.retry, Some(deadline), "submit", &log.log_id, || {
            service.submit(log, bytes.clone())
        })
        .await;

        match outcome {
            RetryOutcome::Done { value: receipt, attempts } => {
                info!(
                    log_id = %log.log_id,
                    subject_id = %record.subject_id,
                    sequence = receipt.sequence_number,
                    attempt = attempts,
                    "record committed"
                );
                Ok(logged(record, receipt))
            }
            RetryOutcome::Failed { attempts, last, .. } => Err(submission_failed(log, record, attempts, last)),
            RetryOutcome::TimedOut { in_flight: true, .. } => {
                warn!(log_id = %log.log_id, subject_id = %record.subject_id, "submission outcome unknown");
                Err(ChainlogError::AmbiguousSubmission {
                    log_id: log.log_id.clone(),
                    subject_id: record.subject_id.clone(),
                    group_id: None,
                    landed: Vec::new(),
                })
            }
            RetryOutcome::TimedOut { in_flight: false, .. } => Err(ChainlogError::DeadlineExceeded {
                log_id: log.log_id.clone(),
                operation: "submit".to_string(),
            }),
        }
    }

    /// Send every chunk not in `landed`, in index order.
    async fn submit_chunks(
        &self,
        log: &LogHandle,
        record: &AttestationRecord,
        group_id: Uuid,
        chunks: Vec<Chunk>,
        mut landed: Vec<u16>,
        deadline: Instant,
    ) -> ChainlogResult<LoggedRecord> {
        let total = chunks.len() as u16;
        let service = &*self.service;
        let mut last_receipt: Option<SubmitReceipt> = None;

        let missing: Vec<&Chunk> = chunks.iter().filter(|c| !landed.contains(&c.index)).collect();
        for chunk in missing {
            let frame = chunk.encode();
            let outcome = call_with_retry(&self.config.retry, Some(deadline), "submit_chunk", &log.log_id, || {
                service.submit(log, frame.clone())
            })
            .await;

            match outcome {
                RetryOutcome::Done { value: receipt, .. } => {
                    debug!(
                        log_id = %log.log_id,
                        group_id = %group_id,
                        index = chunk.index,
                        total,
                        sequence = receipt.sequence_number,
                        "chunk committed"
                    );
                    landed.push(chunk.index);
                    last_receipt = Some(receipt);
                }
                RetryOutcome::Failed { attempts, last, .. } => {
                    if landed.is_empty() {
                        return Err(submission_failed(log, record, attempts, last));
                    }
                    return Err(partial(log, record, group_id, landed, total, last));
                }
                RetryOutcome::TimedOut { in_flight: true, .. } => {
                    landed.sort_unstable();
                    warn!(
                        log_id = %log.log_id,
                        subject_id = %record.subject_id,
                        group_id = %group_id,
                        index = chunk.index,
                        "chunk submission outcome unknown"
                    );
                    return Err(ChainlogError::AmbiguousSubmission {
                        log_id: log.log_id.clone(),
                        subject_id: record.subject_id.clone(),
                        group_id: Some(group_id),
                        landed,
                    });
                }
                RetryOutcome::TimedOut { in_flight: false, .. } => {
                    if landed.is_empty() {
                        return Err(ChainlogError::DeadlineExceeded {
                            log_id: log.log_id.clone(),
                            operation: "submit".to_string(),
                        });
                    }
                    let cause = LogServiceError::Unavailable {
                        reason: format!("deadline passed before chunk {} was sent", chunk.index),
                    };
                    return Err(partial(log, record, group_id, landed, total, cause));
                }
            }
        }

        let receipt = last_receipt.ok_or_else(|| ChainlogError::Validation {
            reason: format!("chunk group {group_id} had nothing left to submit"),
        })?;
        info!(
            log_id = %log.log_id,
            subject_id = %record.subject_id,
            group_id = %group_id,
            sequence = receipt.sequence_number,
            chunks = total,
            "chunked record committed"
        );
        Ok(logged(record, receipt))
    }
}

fn logged(record: &AttestationRecord, receipt: SubmitReceipt) -> LoggedRecord {
    LoggedRecord {
        record: record.clone(),
        sequence_number: receipt.sequence_number,
        consensus_timestamp: receipt.consensus_timestamp,
    }
}

fn submission_failed(
    log: &LogHandle,
    record: &AttestationRecord,
    attempts: u32,
    source: LogServiceError,
) -> ChainlogError {
    warn!(
        log_id = %log.log_id,
        subject_id = %record.subject_id,
        attempt = attempts,
        error = %source,
        "submission failed"
    );
    ChainlogError::Submission {
        log_id: log.log_id.clone(),
        subject_id: record.subject_id.clone(),
        attempts,
        source,
    }
}

fn partial(
    log: &LogHandle,
    record: &AttestationRecord,
    group_id: Uuid,
    mut landed: Vec<u16>,
    total: u16,
    source: LogServiceError,
) -> ChainlogError {
    landed.sort_unstable();
    warn!(
        log_id = %log.log_id,
        subject_id = %record.subject_id,
        group_id = %group_id,
        landed = landed.len(),
        total,
        error = %source,
        "chunk group partially submitted"
    );
    ChainlogError::PartialSubmission {
        log_id: log.log_id.clone(),
        subject_id: record.subject_id.clone(),
        group_id,
        landed,
        total,
        source,
    }
}
