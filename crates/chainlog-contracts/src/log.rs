//! Types exchanged with an append-only log service.
//!
//! The service treats every message as opaque bytes. It assigns a sequence
//! number and a consensus timestamp on commit, and serves messages back in
//! ascending order through cursor-based pages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::Capability;

/// The largest page a log service is required to serve.
pub const MAX_PAGE_LIMIT: usize = 100;

/// A reference to one log, passed explicitly into every operation.
///
/// Handles are cheap to clone and safe to share between concurrent
/// submitters and fetchers; they carry no mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHandle {
    /// Backend-assigned identifier of the log.
    pub log_id: String,

    /// Capability presented on submit. Required when the log was created
    /// with a submit capability.
    pub credential: Option<Capability>,
}

impl LogHandle {
    /// A handle without a credential, sufficient for reading any log and
    /// appending to an open one.
    pub fn new(log_id: impl Into<String>) -> Self {
        Self {
            log_id: log_id.into(),
            credential: None,
        }
    }

    /// Attach the capability to present on submit.
    pub fn with_credential(mut self, credential: Capability) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// Parameters for creating a new log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateLogRequest {
    /// Free-form description stored with the log.
    pub memo: String,

    /// Capability required to change the log's properties.
    pub admin_capability: Option<Capability>,

    /// Capability required to append. `None` leaves the log open.
    pub submit_capability: Option<Capability>,
}

impl CreateLogRequest {
    pub fn new(memo: impl Into<String>) -> Self {
        Self {
            memo: memo.into(),
            ..Default::default()
        }
    }
}

/// The service's acknowledgement that a message was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub sequence_number: u64,
    pub consensus_timestamp: DateTime<Utc>,
}

/// An opaque pagination cursor handed out by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(pub String);

/// A consensus-timestamp window. `after` is exclusive, `until` inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub after: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// True when `ts` falls inside the window.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.after.map_or(true, |after| ts > after) && self.until.map_or(true, |until| ts <= until)
    }
}

/// One page request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Resume point returned by the previous page; `None` starts at the
    /// beginning of the (time-filtered) log.
    pub cursor: Option<Cursor>,

    /// Page size, between 1 and `MAX_PAGE_LIMIT`.
    pub limit: usize,

    /// Subject the caller is interested in. Backends that cannot filter on
    /// payload content ignore it; the client always filters again.
    pub subject_hint: Option<String>,

    /// Restrict the page to a consensus-timestamp window.
    pub time_range: Option<TimeRange>,
}

/// A committed message as stored by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub sequence_number: u64,
    pub consensus_timestamp: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

/// One page of messages in ascending sequence order.
///
/// An absent `next_cursor` marks the end of currently available data, not
/// necessarily the end of the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPage {
    pub messages: Vec<RawMessage>,
    pub next_cursor: Option<Cursor>,
}
