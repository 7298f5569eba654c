//! # chainlog-client
//!
//! Client for hash-chained attestation logs kept on an append-only log
//! service.
//!
//! - `submitter`: canonical submission with retries, chunking of oversized
//!   records and precise failure reporting
//! - `fetcher`  : paginated, reassembling reads as a `Stream`
//! - `AttestationClient`: the facade tying both to chain verification
//!
//! The client holds no locks and no durable state. Share it behind an
//! `Arc`; each subject's `ChainTip` belongs to the caller producing that
//! subject's records.
//!
//! ```rust,ignore
//! let client = AttestationClient::new(Arc::new(InMemoryLogService::new()));
//! let log = client.create_log(CreateLogRequest::new("agent audit")).await?;
//! let builder = RecordBuilder::new();
//! let mut tip = ChainTip::genesis("agent-1");
//! client.attest(&log, &builder, &mut tip, RecordKind::Custom, json!({ "action": "login" })).await?;
//! let report = client.verify_subject(&log, "agent-1").await?;
//! ```

pub mod fetcher;
mod retry;
pub mod submitter;

use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use chainlog_audit::{ChainTip, RecordBuilder};
use chainlog_contracts::{
    error::{ChainlogError, ChainlogResult},
    log::{CreateLogRequest, LogHandle},
    record::{AttestationRecord, LoggedRecord, RecordKind, GENESIS_HASH},
    verify::{BreakReason, ChainBreak, VerificationReport},
};
use chainlog_core::{config::ClientConfig, traits::AppendOnlyLog};
use chainlog_verify::ChainVerifier;

pub use fetcher::{FetchQuery, FetchedLog, Fetcher};
pub use submitter::Submitter;

use crate::retry::{call_with_retry, RetryOutcome};

/// Submits, fetches and verifies attestation records on one log service.
pub struct AttestationClient<L: AppendOnlyLog + ?Sized + 'static> {
    service: Arc<L>,
    config: ClientConfig,
    submitter: Submitter<L>,
    fetcher: Fetcher<L>,
    verifier: ChainVerifier,
}

impl<L: AppendOnlyLog + ?Sized + 'static> AttestationClient<L> {
    /// A client with the default configuration.
    pub fn new(service: Arc<L>) -> Self {
        Self::build(service, ClientConfig::default())
    }

    /// A client with `config`, validated first.
    pub fn with_config(service: Arc<L>, config: ClientConfig) -> ChainlogResult<Self> {
        config.validate()?;
        Ok(Self::build(service, config))
    }

    fn build(service: Arc<L>, config: ClientConfig) -> Self {
        Self {
            submitter: Submitter::new(Arc::clone(&service), config.clone()),
            fetcher: Fetcher::new(Arc::clone(&service), config.clone()),
            verifier: ChainVerifier::new(),
            service,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<L> {
        &self.service
    }

    /// Create a log on the service.
    pub async fn create_log(&self, request: CreateLogRequest) -> ChainlogResult<LogHandle> {
        let deadline = Instant::now() + self.config.deadlines.submit();
        let service = &*self.service;
        let outcome = call_with_retry(&self.config.retry, Some(deadline), "create_log", "<new>", || {
            service.create_log(request.clone())
        })
        .await;

        match outcome {
            RetryOutcome::Done { value: log, .. } => {
                info!(log_id = %log.log_id, memo = %request.memo, "attestation log ready");
                Ok(log)
            }
            RetryOutcome::Failed { last, .. } => Err(ChainlogError::LogService {
                log_id: "<new>".to_string(),
                source: last,
            }),
            RetryOutcome::TimedOut { .. } => Err(ChainlogError::DeadlineExceeded {
                log_id: "<new>".to_string(),
                operation: "create_log".to_string(),
            }),
        }
    }

    // ── Submission ────────────────────────────────────────────────────────────

    pub async fn submit(&self, log: &LogHandle, record: &AttestationRecord) -> ChainlogResult<LoggedRecord> {
        self.submitter.submit(log, record).await
    }

    pub async fn submit_by(
        &self,
        log: &LogHandle,
        record: &AttestationRecord,
        deadline: Instant,
    ) -> ChainlogResult<LoggedRecord> {
        self.submitter.submit_by(log, record, deadline).await
    }

    pub async fn resume_chunks(
        &self,
        log: &LogHandle,
        record: &AttestationRecord,
        group_id: Uuid,
        landed: &[u16],
        deadline: Instant,
    ) -> ChainlogResult<LoggedRecord> {
        self.submitter
            .resume_chunks(log, record, group_id, landed, deadline)
            .await
    }

    /// Build the next record of `tip`'s chain, submit it, and advance the
    /// tip once it has committed.
    ///
    /// On any error the tip is left where it was.
    pub async fn attest(
        &self,
        log: &LogHandle,
        builder: &RecordBuilder,
        tip: &mut ChainTip,
        kind: RecordKind,
        payload: Value,
    ) -> ChainlogResult<LoggedRecord> {
        let built = tip.next(builder, kind, payload)?;
        let logged = self.submit(log, &built.record).await?;
        tip.advance(&built);
        Ok(logged)
    }

    // ── Fetching ──────────────────────────────────────────────────────────────

    pub fn fetch(&self, log: &LogHandle, query: FetchQuery) -> BoxStream<'static, ChainlogResult<LoggedRecord>> {
        self.fetcher.fetch(log, query)
    }

    pub fn fetch_by(
        &self,
        log: &LogHandle,
        query: FetchQuery,
        deadline: Instant,
    ) -> BoxStream<'static, ChainlogResult<LoggedRecord>> {
        self.fetcher.fetch_by(log, query, deadline)
    }

    pub async fn fetch_all(&self, log: &LogHandle, query: FetchQuery) -> ChainlogResult<FetchedLog> {
        self.fetcher.fetch_all(log, query).await
    }

    pub async fn fetch_all_by(
        &self,
        log: &LogHandle,
        query: FetchQuery,
        deadline: Instant,
    ) -> ChainlogResult<FetchedLog> {
        self.fetcher.fetch_all_by(log, query, deadline).await
    }

    // ── Verification ──────────────────────────────────────────────────────────

    /// Fetch every record of `subject_id` and verify its chain.
    ///
    /// A malformed message cannot be attributed to a subject, so each one on
    /// the log is reported as an `UnreadableRecord` break and the chain does
    /// not verify.
    pub async fn verify_subject(&self, log: &LogHandle, subject_id: &str) -> ChainlogResult<VerificationReport> {
        let fetched = self.fetch_all(log, FetchQuery::subject(subject_id)).await?;
        let mut report = self.verifier.verify(&fetched.records);
        report.subject_id = Some(subject_id.to_string());

        if !fetched.malformed.is_empty() {
            warn!(
                log_id = %log.log_id,
                subject_id = %subject_id,
                malformed = fetched.malformed.len(),
                "unreadable messages on the log, chain cannot be confirmed"
            );
            report.breaks.extend(fetched.malformed.iter().map(unreadable_break));
            report.breaks.sort_by_key(|b| b.at_sequence);
            report.valid = false;
        }
        Ok(report)
    }

    /// The tip to continue `subject_id`'s chain from, e.g. after a restart.
    ///
    /// # Errors
    ///
    /// `ChainlogError::BrokenChain` with the verifier's findings when the
    /// existing chain does not verify; a broken chain is never continued.
    pub async fn chain_head(&self, log: &LogHandle, subject_id: &str) -> ChainlogResult<ChainTip> {
        let report = self.verify_subject(log, subject_id).await?;
        if !report.valid {
            warn!(
                log_id = %log.log_id,
                subject_id = %subject_id,
                breaks = report.breaks.len(),
                "refusing to continue a broken chain"
            );
            return Err(ChainlogError::BrokenChain {
                log_id: log.log_id.clone(),
                subject_id: subject_id.to_string(),
                breaks: report.breaks,
            });
        }
        let head = report.head_hash.unwrap_or_else(|| GENESIS_HASH.to_string());
        Ok(ChainTip::at(subject_id, head))
    }
}

fn unreadable_break(error: &ChainlogError) -> ChainBreak {
    let (at_sequence, observed) = match error {
        ChainlogError::MalformedRecord { sequence, reason, .. } => (sequence.unwrap_or(0), reason.clone()),
        other => (0, other.to_string()),
    };
    ChainBreak {
        at_sequence,
        reason: BreakReason::UnreadableRecord,
        expected: "a decodable record".to_string(),
        observed,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
