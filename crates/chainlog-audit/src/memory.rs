//! In-memory implementation of `AppendOnlyLog`.
//!
//! `InMemoryLogService` is the reference backend. It keeps every log in a
//! `HashMap` behind a `Mutex`, assigns sequence numbers from 1 and strictly
//! increasing consensus timestamps, enforces submit capabilities and the
//! message size cap, and serves cursor-based pages.
//!
//! It also exposes hooks that let tests and demos reproduce what a real
//! service does to a client: throttling and outages, slow acknowledgements,
//! replication lag, and an attacker rewriting stored bytes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use chainlog_contracts::{
    capability::Capability,
    error::LogServiceError,
    log::{
        CreateLogRequest, Cursor, LogHandle, LogPage, PageRequest, RawMessage, SubmitReceipt,
        MAX_PAGE_LIMIT,
    },
};
use chainlog_core::traits::AppendOnlyLog;

/// Message size cap of the reference service.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024;

// ── Internal mutable state ────────────────────────────────────────────────────

pub(crate) struct LogState {
    pub(crate) memo: String,
    pub(crate) admin_capability: Option<Capability>,
    pub(crate) submit_capability: Option<Capability>,
    pub(crate) messages: Vec<RawMessage>,
    /// Messages at or above this sequence number are committed but not yet
    /// served by `fetch_page`.
    pub(crate) hidden_from: Option<u64>,
}

pub(crate) struct ServiceState {
    pub(crate) next_log_number: u64,
    pub(crate) logs: HashMap<String, LogState>,
    pub(crate) submit_faults: VecDeque<LogServiceError>,
    pub(crate) fetch_faults: VecDeque<LogServiceError>,
    pub(crate) ack_delay: Option<Duration>,
    pub(crate) last_timestamp: Option<DateTime<Utc>>,
}

// ── Public service ────────────────────────────────────────────────────────────

/// An in-process append-only log service.
///
/// Cloning is cheap and every clone observes the same logs.
#[derive(Clone)]
pub struct InMemoryLogService {
    pub(crate) state: Arc<Mutex<ServiceState>>,
    max_message_bytes: usize,
}

impl InMemoryLogService {
    pub fn new() -> Self {
        Self::with_max_message_bytes(DEFAULT_MAX_MESSAGE_BYTES)
    }

    /// A service accepting messages up to `max_message_bytes`.
    pub fn with_max_message_bytes(max_message_bytes: usize) -> Self {
        let state = ServiceState {
            next_log_number: 1001,
            logs: HashMap::new(),
            submit_faults: VecDeque::new(),
            fetch_faults: VecDeque::new(),
            ack_delay: None,
            last_timestamp: None,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            max_message_bytes,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ServiceState>, LogServiceError> {
        self.state.lock().map_err(|e| LogServiceError::Unavailable {
            reason: format!("log state lock poisoned: {}", e),
        })
    }

    // ── Fault injection ───────────────────────────────────────────────────────

    /// Fail the next submit call with `error`. Queued errors are consumed in
    /// order, one per call.
    pub fn inject_submit_failure(&self, error: LogServiceError) {
        if let Ok(mut state) = self.lock() {
            state.submit_faults.push_back(error);
        }
    }

    /// Fail the next page fetch with `error`.
    pub fn inject_fetch_failure(&self, error: LogServiceError) {
        if let Ok(mut state) = self.lock() {
            state.fetch_faults.push_back(error);
        }
    }

    /// Commit submissions immediately but hold the acknowledgement back for
    /// `delay`. `None` acknowledges at once.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        if let Ok(mut state) = self.lock() {
            state.ack_delay = delay;
        }
    }

    /// Stop serving messages from `sequence` onwards, as if they had not
    /// propagated to the read side yet.
    pub fn hide_from(&self, log_id: &str, sequence: u64) {
        if let Ok(mut state) = self.lock() {
            if let Some(log) = state.logs.get_mut(log_id) {
                log.hidden_from = Some(sequence);
            }
        }
    }

    /// Serve every committed message again.
    pub fn reveal_all(&self, log_id: &str) {
        if let Ok(mut state) = self.lock() {
            if let Some(log) = state.logs.get_mut(log_id) {
                log.hidden_from = None;
            }
        }
    }

    /// Rewrite the stored bytes of one message in place, bypassing every
    /// check. Returns false when the message does not exist.
    pub fn tamper<F>(&self, log_id: &str, sequence: u64, rewrite: F) -> bool
    where
        F: FnOnce(&mut Vec<u8>),
    {
        let Ok(mut state) = self.lock() else {
            return false;
        };
        let Some(message) = state
            .logs
            .get_mut(log_id)
            .and_then(|log| log.messages.iter_mut().find(|m| m.sequence_number == sequence))
        else {
            return false;
        };
        rewrite(&mut message.bytes);
        warn!(log_id = %log_id, sequence, "stored message rewritten");
        true
    }

    // ── Inspection and administration ─────────────────────────────────────────

    /// Every committed message of a log, hidden ones included.
    pub fn messages(&self, log_id: &str) -> Vec<RawMessage> {
        self.lock()
            .ok()
            .and_then(|state| state.logs.get(log_id).map(|log| log.messages.clone()))
            .unwrap_or_default()
    }

    pub fn memo(&self, log_id: &str) -> Option<String> {
        self.lock()
            .ok()
            .and_then(|state| state.logs.get(log_id).map(|log| log.memo.clone()))
    }

    /// Change a log's memo. Requires the handle to present the admin
    /// capability; a log created without one is immutable.
    pub fn update_memo(&self, log: &LogHandle, memo: impl Into<String>) -> Result<(), LogServiceError> {
        let mut state = self.lock()?;
        let entry = state.logs.get_mut(&log.log_id).ok_or_else(|| LogServiceError::NotFound {
            log_id: log.log_id.clone(),
        })?;

        match &entry.admin_capability {
            None => Err(LogServiceError::Unauthorized {
                reason: format!("log '{}' has no admin capability and is immutable", log.log_id),
            }),
            Some(admin) if log.credential.as_ref() != Some(admin) => Err(LogServiceError::Unauthorized {
                reason: format!("handle does not hold the admin capability of log '{}'", log.log_id),
            }),
            Some(_) => {
                entry.memo = memo.into();
                Ok(())
            }
        }
    }
}

impl Default for InMemoryLogService {
    fn default() -> Self {
        Self::new()
    }
}

/// Next consensus timestamp: now, or 1ns past the previous one if the
/// clock has not moved.
fn next_timestamp(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match last {
        Some(last) if now <= last => last + chrono::Duration::nanoseconds(1),
        _ => now,
    }
}

fn parse_cursor(cursor: &Cursor) -> Result<u64, LogServiceError> {
    cursor.0.parse::<u64>().map_err(|_| LogServiceError::Rejected {
        reason: format!("invalid cursor '{}'", cursor.0),
    })
}

// ── AppendOnlyLog impl ────────────────────────────────────────────────────────

#[async_trait]
impl AppendOnlyLog for InMemoryLogService {
    async fn create_log(&self, request: CreateLogRequest) -> Result<LogHandle, LogServiceError> {
        let mut state = self.lock()?;
        let log_id = format!("log-{}", state.next_log_number);
        state.next_log_number += 1;

        state.logs.insert(
            log_id.clone(),
            LogState {
                memo: request.memo.clone(),
                admin_capability: request.admin_capability,
                submit_capability: request.submit_capability.clone(),
                messages: Vec::new(),
                hidden_from: None,
            },
        );

        info!(log_id = %log_id, memo = %request.memo, "log created");

        Ok(LogHandle {
            log_id,
            credential: request.submit_capability,
        })
    }

    /// Commit `message`, then acknowledge it (after the configured ack
    /// delay, if any).
    async fn submit(&self, log: &LogHandle, message: Vec<u8>) -> Result<SubmitReceipt, LogServiceError> {
        let (receipt, ack_delay) = {
            let mut state = self.lock()?;

            if let Some(fault) = state.submit_faults.pop_front() {
                debug!(log_id = %log.log_id, error = %fault, "injected submit failure");
                return Err(fault);
            }

            if message.len() > self.max_message_bytes {
                return Err(LogServiceError::Rejected {
                    reason: format!(
                        "message of {} bytes exceeds the {}-byte limit",
                        message.len(),
                        self.max_message_bytes
                    ),
                });
            }

            let consensus_timestamp = next_timestamp(state.last_timestamp);
            let ack_delay = state.ack_delay;

            let entry = state.logs.get_mut(&log.log_id).ok_or_else(|| LogServiceError::NotFound {
                log_id: log.log_id.clone(),
            })?;

            if let Some(required) = &entry.submit_capability {
                if log.credential.as_ref() != Some(required) {
                    return Err(LogServiceError::Unauthorized {
                        reason: format!("log '{}' requires a submit capability", log.log_id),
                    });
                }
            }

            let sequence_number = entry.messages.len() as u64 + 1;
            entry.messages.push(RawMessage {
                sequence_number,
                consensus_timestamp,
                bytes: message,
            });
            state.last_timestamp = Some(consensus_timestamp);

            (
                SubmitReceipt {
                    sequence_number,
                    consensus_timestamp,
                },
                ack_delay,
            )
        };

        debug!(
            log_id = %log.log_id,
            sequence = receipt.sequence_number,
            "message committed"
        );

        if let Some(delay) = ack_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(receipt)
    }

    async fn fetch_page(&self, log: &LogHandle, request: PageRequest) -> Result<LogPage, LogServiceError> {
        if request.limit == 0 || request.limit > MAX_PAGE_LIMIT {
            return Err(LogServiceError::Rejected {
                reason: format!("page limit must be between 1 and {}, got {}", MAX_PAGE_LIMIT, request.limit),
            });
        }

        let mut state = self.lock()?;
        if let Some(fault) = state.fetch_faults.pop_front() {
            debug!(log_id = %log.log_id, error = %fault, "injected fetch failure");
            return Err(fault);
        }

        let entry = state.logs.get(&log.log_id).ok_or_else(|| LogServiceError::NotFound {
            log_id: log.log_id.clone(),
        })?;

        let start = match &request.cursor {
            Some(cursor) => parse_cursor(cursor)?,
            None => 0,
        };
        let range = request.time_range.unwrap_or_default();

        let mut visible = entry.messages.iter().filter(|m| {
            m.sequence_number >= start
                && entry.hidden_from.map_or(true, |hidden| m.sequence_number < hidden)
                && range.contains(m.consensus_timestamp)
        });

        let messages: Vec<RawMessage> = visible.by_ref().take(request.limit).cloned().collect();
        let next_cursor = visible.next().map(|m| Cursor(m.sequence_number.to_string()));

        Ok(LogPage { messages, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chainlog_contracts::{
        capability::Capability,
        error::LogServiceError,
        log::{CreateLogRequest, LogHandle, PageRequest, TimeRange},
    };
    use chainlog_core::traits::AppendOnlyLog;

    use super::InMemoryLogService;

    fn page(limit: usize) -> PageRequest {
        PageRequest {
            limit,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sequence_numbers_start_at_one_and_timestamps_increase() {
        let service = InMemoryLogService::new();
        let log = service.create_log(CreateLogRequest::new("audit")).await.unwrap();

        let mut receipts = Vec::new();
        for i in 0..5u8 {
            receipts.push(service.submit(&log, vec![b'{', i]).await.unwrap());
        }

        for (i, pair) in receipts.windows(2).enumerate() {
            assert_eq!(pair[0].sequence_number, i as u64 + 1);
            assert!(pair[1].consensus_timestamp > pair[0].consensus_timestamp);
        }
        assert_eq!(receipts[4].sequence_number, 5);
    }

    #[tokio::test]
    async fn pages_follow_cursors_to_the_end() {
        let service = InMemoryLogService::new();
        let log = service.create_log(CreateLogRequest::new("audit")).await.unwrap();
        for i in 0..7u8 {
            service.submit(&log, vec![i]).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut request = page(3);
        loop {
            let result = service.fetch_page(&log, request.clone()).await.unwrap();
            seen.extend(result.messages.iter().map(|m| m.sequence_number));
            match result.next_cursor {
                Some(cursor) => request.cursor = Some(cursor),
                None => break,
            }
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn page_limit_is_bounded() {
        let service = InMemoryLogService::new();
        let log = service.create_log(CreateLogRequest::new("audit")).await.unwrap();
        let err = service.fetch_page(&log, page(101)).await.unwrap_err();
        assert!(matches!(err, LogServiceError::Rejected { .. }));
        assert!(service.fetch_page(&log, page(0)).await.is_err());
    }

    #[tokio::test]
    async fn time_range_filters_messages() {
        let service = InMemoryLogService::new();
        let log = service.create_log(CreateLogRequest::new("audit")).await.unwrap();
        let first = service.submit(&log, vec![1]).await.unwrap();
        service.submit(&log, vec![2]).await.unwrap();

        let request = PageRequest {
            limit: 10,
            time_range: Some(TimeRange {
                after: Some(first.consensus_timestamp),
                until: None,
            }),
            ..Default::default()
        };
        let result = service.fetch_page(&log, request).await.unwrap();
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].sequence_number, 2);
    }

    #[tokio::test]
    async fn submit_capability_is_enforced() {
        let service = InMemoryLogService::new();
        let mut request = CreateLogRequest::new("restricted");
        request.submit_capability = Some(Capability::new("submit-key"));
        let owner = service.create_log(request).await.unwrap();

        assert!(service.submit(&owner, vec![1]).await.is_ok());

        let stranger = LogHandle::new(owner.log_id.clone());
        let err = service.submit(&stranger, vec![2]).await.unwrap_err();
        assert!(matches!(err, LogServiceError::Unauthorized { .. }));

        let other_key = stranger.with_credential(Capability::new("wrong-key"));
        assert!(service.submit(&other_key, vec![3]).await.is_err());

        // Reading needs no capability.
        let result = service.fetch_page(&LogHandle::new(owner.log_id.clone()), page(10)).await.unwrap();
        assert_eq!(result.messages.len(), 1);
    }

    #[tokio::test]
    async fn oversized_messages_are_rejected() {
        let service = InMemoryLogService::with_max_message_bytes(128);
        let log = service.create_log(CreateLogRequest::new("audit")).await.unwrap();
        let err = service.submit(&log, vec![0; 129]).await.unwrap_err();
        assert!(matches!(err, LogServiceError::Rejected { .. }));
        assert!(service.submit(&log, vec![0; 128]).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_log_is_not_found() {
        let service = InMemoryLogService::new();
        let ghost = LogHandle::new("log-9999");
        assert!(matches!(
            service.submit(&ghost, vec![1]).await,
            Err(LogServiceError::NotFound { .. })
        ));
        assert!(matches!(
            service.fetch_page(&ghost, page(10)).await,
            Err(LogServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let service = InMemoryLogService::new();
        let log = service.create_log(CreateLogRequest::new("audit")).await.unwrap();
        service.inject_submit_failure(LogServiceError::Throttled { reason: "busy".into() });
        service.inject_fetch_failure(LogServiceError::Unavailable { reason: "down".into() });

        assert!(matches!(
            service.submit(&log, vec![1]).await,
            Err(LogServiceError::Throttled { .. })
        ));
        assert!(service.submit(&log, vec![1]).await.is_ok());
        assert!(service.fetch_page(&log, page(10)).await.is_err());
        assert!(service.fetch_page(&log, page(10)).await.is_ok());
    }

    #[tokio::test]
    async fn ack_delay_commits_before_acknowledging() {
        let service = InMemoryLogService::new();
        let log = service.create_log(CreateLogRequest::new("audit")).await.unwrap();
        service.set_ack_delay(Some(Duration::from_millis(200)));

        let timed_out = tokio::time::timeout(Duration::from_millis(20), service.submit(&log, vec![1])).await;
        assert!(timed_out.is_err());
        assert_eq!(service.messages(&log.log_id).len(), 1);
    }

    #[tokio::test]
    async fn hidden_messages_are_committed_but_not_served() {
        let service = InMemoryLogService::new();
        let log = service.create_log(CreateLogRequest::new("audit")).await.unwrap();
        for i in 0..3u8 {
            service.submit(&log, vec![i]).await.unwrap();
        }
        service.hide_from(&log.log_id, 3);
        assert_eq!(service.fetch_page(&log, page(10)).await.unwrap().messages.len(), 2);

        service.reveal_all(&log.log_id);
        assert_eq!(service.fetch_page(&log, page(10)).await.unwrap().messages.len(), 3);
    }

    #[tokio::test]
    async fn tamper_rewrites_stored_bytes() {
        let service = InMemoryLogService::new();
        let log = service.create_log(CreateLogRequest::new("audit")).await.unwrap();
        service.submit(&log, b"original".to_vec()).await.unwrap();

        assert!(service.tamper(&log.log_id, 1, |bytes| *bytes = b"forged".to_vec()));
        assert!(!service.tamper(&log.log_id, 2, |_| {}));
        assert_eq!(service.messages(&log.log_id)[0].bytes, b"forged".to_vec());
    }

    #[tokio::test]
    async fn memo_updates_require_admin_capability() {
        let service = InMemoryLogService::new();

        let immutable = service.create_log(CreateLogRequest::new("fixed")).await.unwrap();
        assert!(service.update_memo(&immutable, "changed").is_err());
        assert_eq!(service.memo(&immutable.log_id).as_deref(), Some("fixed"));

        let mut request = CreateLogRequest::new("v1");
        request.admin_capability = Some(Capability::new("admin-key"));
        let log = service.create_log(request).await.unwrap();

        let admin = LogHandle::new(log.log_id.clone()).with_credential(Capability::new("admin-key"));
        service.update_memo(&admin, "v2").unwrap();
        assert_eq!(service.memo(&log.log_id).as_deref(), Some("v2"));

        assert!(matches!(
            service.update_memo(&LogHandle::new(log.log_id.clone()), "v3"),
            Err(LogServiceError::Unauthorized { .. })
        ));
    }
}
