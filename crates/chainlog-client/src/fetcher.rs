//! Paginated, reassembling reads of an append-only log.
//!
//! `Fetcher::fetch` returns a lazy stream that walks the log from the start
//! (or the query's time window), follows `next_cursor` until the service
//! has nothing more, reassembles chunk groups and yields logged records in
//! log order. Each call re-walks the log; it is not a live subscription.
//!
//! Unparsable messages come out as `MalformedRecord` items and the stream
//! keeps going. Page failures and incomplete chunk groups end it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use chainlog_audit::chunk::{decode_message, decode_record, Reassembler, WireMessage};
use chainlog_contracts::{
    error::{ChainlogError, ChainlogResult},
    log::{Cursor, LogHandle, PageRequest, RawMessage, TimeRange, MAX_PAGE_LIMIT},
    record::{AttestationRecord, LoggedRecord},
};
use chainlog_core::{
    config::{ClientConfig, RetryConfig},
    traits::AppendOnlyLog,
};

use crate::retry::{call_with_retry, RetryOutcome};

/// What to read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchQuery {
    /// Only yield records of this subject. Applied after reassembly.
    pub subject_id: Option<String>,
    /// Consensus-timestamp window, applied by the service.
    pub time_range: Option<TimeRange>,
    /// Page size, 1 to 100. Defaults to `FetchConfig::page_limit`.
    pub page_limit: Option<usize>,
}

impl FetchQuery {
    /// Every record on the log.
    pub fn all() -> Self {
        Self::default()
    }

    /// Every record of one subject.
    pub fn subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            ..Self::default()
        }
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = Some(time_range);
        self
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = Some(page_limit);
        self
    }
}

/// A fully drained fetch: the records, and the messages that could not be
/// decoded.
#[derive(Debug, Default)]
pub struct FetchedLog {
    pub records: Vec<LoggedRecord>,
    /// `ChainlogError::MalformedRecord` entries, in log order.
    pub malformed: Vec<ChainlogError>,
}

/// Reads records from a log.
pub struct Fetcher<L: AppendOnlyLog + ?Sized> {
    service: Arc<L>,
    config: ClientConfig,
}

impl<L: AppendOnlyLog + ?Sized> Clone for Fetcher<L> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            config: self.config.clone(),
        }
    }
}

impl<L: AppendOnlyLog + ?Sized + 'static> Fetcher<L> {
    pub fn new(service: Arc<L>, config: ClientConfig) -> Self {
        Self { service, config }
    }

    /// Stream the records matching `query` with no deadline.
    ///
    /// Chunk groups still incomplete when the log has no more data fail at
    /// once with `IncompleteChunkGroup`.
    pub fn fetch(&self, log: &LogHandle, query: FetchQuery) -> BoxStream<'static, ChainlogResult<LoggedRecord>> {
        self.stream(log, query, None)
    }

    /// Stream the records matching `query`, bounded by `deadline`.
    ///
    /// Incomplete chunk groups are waited for: the log is polled for newer
    /// messages every `poll_interval_ms` until the groups complete or the
    /// deadline passes.
    pub fn fetch_by(
        &self,
        log: &LogHandle,
        query: FetchQuery,
        deadline: Instant,
    ) -> BoxStream<'static, ChainlogResult<LoggedRecord>> {
        self.stream(log, query, Some(deadline))
    }

    /// Drain `fetch_by` under the configured fetch deadline.
    ///
    /// Malformed messages are collected rather than returned; any other
    /// error aborts.
    pub async fn fetch_all(&self, log: &LogHandle, query: FetchQuery) -> ChainlogResult<FetchedLog> {
        let deadline = Instant::now() + self.config.deadlines.fetch();
        self.fetch_all_by(log, query, deadline).await
    }

    pub async fn fetch_all_by(
        &self,
        log: &LogHandle,
        query: FetchQuery,
        deadline: Instant,
    ) -> ChainlogResult<FetchedLog> {
        let mut items = self.fetch_by(log, query, deadline);
        let mut fetched = FetchedLog::default();
        while let Some(item) = items.next().await {
            match item {
                Ok(record) => fetched.records.push(record),
                Err(error @ ChainlogError::MalformedRecord { .. }) => fetched.malformed.push(error),
                Err(error) => return Err(error),
            }
        }
        debug!(
            log_id = %log.log_id,
            records = fetched.records.len(),
            malformed = fetched.malformed.len(),
            "fetch complete"
        );
        Ok(fetched)
    }

    fn stream(
        &self,
        log: &LogHandle,
        query: FetchQuery,
        deadline: Option<Instant>,
    ) -> BoxStream<'static, ChainlogResult<LoggedRecord>> {
        let page_limit = query.page_limit.unwrap_or(self.config.fetch.page_limit);
        let mut state = FetchState {
            service: Arc::clone(&self.service),
            log: log.clone(),
            subject_id: query.subject_id,
            time_range: query.time_range,
            page_limit,
            retry: self.config.retry.clone(),
            poll_interval: self.config.fetch.poll_interval(),
            deadline,
            cursor: None,
            phase: Phase::Paging,
            polling: false,
            reassembler: Reassembler::new(),
            ready: VecDeque::new(),
            high_water: None,
        };

        if page_limit == 0 || page_limit > MAX_PAGE_LIMIT {
            state.ready.push_back(Err(ChainlogError::Validation {
                reason: format!("page limit must be between 1 and {MAX_PAGE_LIMIT}, got {page_limit}"),
            }));
            state.phase = Phase::Done;
        }

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.ready.pop_front() {
                    return Some((item, state));
                }
                match state.phase {
                    Phase::Paging => state.next_page().await,
                    Phase::Exhausted => state.wait_for_chunks().await,
                    Phase::Done => return None,
                }
            }
        })
        .boxed()
    }
}

// ── Stream state machine ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Following cursors.
    Paging,
    /// The service has no more data right now.
    Exhausted,
    Done,
}

struct FetchState<L: AppendOnlyLog + ?Sized> {
    service: Arc<L>,
    log: LogHandle,
    subject_id: Option<String>,
    time_range: Option<TimeRange>,
    page_limit: usize,
    retry: RetryConfig,
    poll_interval: Duration,
    deadline: Option<Instant>,
    cursor: Option<Cursor>,
    phase: Phase,
    /// Set once pages are requested only to complete pending chunk groups.
    polling: bool,
    reassembler: Reassembler,
    ready: VecDeque<ChainlogResult<LoggedRecord>>,
    /// Highest sequence number ingested. Re-polled pages overlap what was
    /// already read; anything at or below it is dropped.
    high_water: Option<u64>,
}

impl<L: AppendOnlyLog + ?Sized> FetchState<L> {
    async fn next_page(&mut self) {
        let request = PageRequest {
            cursor: self.cursor.clone(),
            limit: self.page_limit,
            subject_hint: self.subject_id.clone(),
            time_range: self.time_range,
        };

        let service = &*self.service;
        let log = &self.log;
        let outcome = call_with_retry(&self.retry, self.deadline, "fetch_page", &log.log_id, || {
            service.fetch_page(log, request.clone())
        })
        .await;

        match outcome {
            RetryOutcome::Done { value: page, .. } => {
                debug!(
                    log_id = %self.log.log_id,
                    messages = page.messages.len(),
                    more = page.next_cursor.is_some(),
                    "page fetched"
                );
                for message in page.messages {
                    self.ingest(message);
                }
                // The last page's cursor is kept: polling re-reads from it.
                match page.next_cursor {
                    Some(cursor) => self.cursor = Some(cursor),
                    None => self.phase = Phase::Exhausted,
                }
            }
            RetryOutcome::Failed {
                last,
                deadline_hit: false,
                ..
            } => {
                warn!(log_id = %self.log.log_id, error = %last, "log unreachable");
                self.fail(ChainlogError::LogService {
                    log_id: self.log.log_id.clone(),
                    source: last,
                });
            }
            _ if self.polling => self.fail_incomplete(),
            _ => self.fail(ChainlogError::DeadlineExceeded {
                log_id: self.log.log_id.clone(),
                operation: "fetch".to_string(),
            }),
        }
    }

    /// Data is exhausted: finish, or poll for the rest of pending groups.
    async fn wait_for_chunks(&mut self) {
        if self.reassembler.is_empty() {
            self.phase = Phase::Done;
            return;
        }
        let Some(deadline) = self.deadline else {
            self.fail_incomplete();
            return;
        };

        let now = Instant::now();
        let wake = now + self.poll_interval;
        if wake >= deadline {
            tokio::time::sleep_until(deadline).await;
            self.fail_incomplete();
            return;
        }
        tokio::time::sleep_until(wake).await;

        debug!(
            log_id = %self.log.log_id,
            pending = self.reassembler.pending().len(),
            "polling for outstanding chunks"
        );
        self.polling = true;
        self.phase = Phase::Paging;
    }

    fn ingest(&mut self, message: RawMessage) {
        let sequence = message.sequence_number;
        let timestamp = message.consensus_timestamp;
        if self.high_water.is_some_and(|seen| sequence <= seen) {
            return;
        }
        self.high_water = Some(sequence);

        let record = match decode_message(&message.bytes) {
            Ok(WireMessage::Record(record)) => record,
            Ok(WireMessage::Chunk(chunk)) => match self.reassembler.accept(chunk) {
                Ok(Some(bytes)) => match decode_record(&bytes) {
                    Ok(record) => record,
                    Err(reason) => return self.malformed(sequence, reason),
                },
                Ok(None) => return,
                Err(reason) => return self.malformed(sequence, reason),
            },
            Err(reason) => return self.malformed(sequence, reason),
        };

        self.emit(record, sequence, timestamp);
    }

    fn emit(&mut self, record: AttestationRecord, sequence_number: u64, consensus_timestamp: DateTime<Utc>) {
        if let Some(subject) = &self.subject_id {
            if record.subject_id != *subject {
                return;
            }
        }
        self.ready.push_back(Ok(LoggedRecord {
            record,
            sequence_number,
            consensus_timestamp,
        }));
    }

    fn malformed(&mut self, sequence: u64, reason: String) {
        warn!(log_id = %self.log.log_id, sequence, reason = %reason, "skipping malformed message");
        self.ready.push_back(Err(ChainlogError::MalformedRecord {
            log_id: self.log.log_id.clone(),
            sequence: Some(sequence),
            reason,
        }));
    }

    fn fail(&mut self, error: ChainlogError) {
        self.ready.push_back(Err(error));
        self.phase = Phase::Done;
    }

    fn fail_incomplete(&mut self) {
        for group in self.reassembler.pending() {
            warn!(
                log_id = %self.log.log_id,
                group_id = %group.group_id,
                received = group.received,
                total = group.total,
                "chunk group incomplete"
            );
            self.ready.push_back(Err(ChainlogError::IncompleteChunkGroup {
                log_id: self.log.log_id.clone(),
                group_id: group.group_id,
                received: group.received,
                total: group.total,
            }));
        }
        self.phase = Phase::Done;
    }
}
