//! Error types for the chainlog client.
//!
//! All fallible client operations return `ChainlogResult<T>`. Variants carry
//! the log, subject and sequence context a caller needs to act. A broken
//! chain is not an error: see `verify::ChainBreak`.

use thiserror::Error;
use uuid::Uuid;

use crate::verify::ChainBreak;

/// Failures reported by an append-only log service backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogServiceError {
    /// The service is rate limiting this caller.
    #[error("throttled by log service: {reason}")]
    Throttled { reason: String },

    /// The service could not be reached or is temporarily down.
    #[error("log service unavailable: {reason}")]
    Unavailable { reason: String },

    /// The handle does not present the capability the log requires.
    #[error("not authorized: {reason}")]
    Unauthorized { reason: String },

    /// No log with this id exists.
    #[error("log '{log_id}' not found")]
    NotFound { log_id: String },

    /// The service refused the request as invalid (oversized, bad limit, ...).
    #[error("request rejected by log service: {reason}")]
    Rejected { reason: String },
}

impl LogServiceError {
    /// True for failures worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LogServiceError::Throttled { .. } | LogServiceError::Unavailable { .. }
        )
    }
}

/// The unified error type for the chainlog client.
#[derive(Debug, Error)]
pub enum ChainlogError {
    /// A record or request is malformed before anything was sent. Never retried.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// The serialized record does not fit under the configured limits.
    #[error("record of {size} bytes exceeds the {limit}-byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Retries against the log service were exhausted, or the service
    /// refused the submission outright.
    #[error("submission to log '{log_id}' for subject '{subject_id}' failed after {attempts} attempt(s)")]
    Submission {
        log_id: String,
        subject_id: String,
        attempts: u32,
        #[source]
        source: LogServiceError,
    },

    /// Some chunks of a group committed, the rest did not.
    ///
    /// `landed` lists the committed chunk indices so the caller can resume
    /// the remaining ones under the same group id or abandon the group.
    #[error("chunk group {group_id} on log '{log_id}' incomplete: {} of {total} chunk(s) landed", .landed.len())]
    PartialSubmission {
        log_id: String,
        subject_id: String,
        group_id: Uuid,
        landed: Vec<u16>,
        total: u16,
        #[source]
        source: LogServiceError,
    },

    /// The deadline passed while a submission was in flight. The record may
    /// or may not have committed; fetch and check before retrying.
    #[error("submission to log '{log_id}' for subject '{subject_id}' has unknown outcome (deadline elapsed in flight)")]
    AmbiguousSubmission {
        log_id: String,
        subject_id: String,
        /// Chunk group in progress, when the record was being chunked.
        group_id: Option<Uuid>,
        /// Chunk indices confirmed before the deadline.
        landed: Vec<u16>,
    },

    /// A chunk group has not fully arrived in the log.
    #[error("chunk group {group_id} on log '{log_id}' incomplete: {received} of {total} chunk(s) seen")]
    IncompleteChunkGroup {
        log_id: String,
        group_id: Uuid,
        received: usize,
        total: u16,
    },

    /// Bytes read from the log could not be decoded into a record.
    #[error("malformed record on log '{log_id}'{}: {reason}", .sequence.map(|s| format!(" at sequence {s}")).unwrap_or_default())]
    MalformedRecord {
        log_id: String,
        sequence: Option<u64>,
        reason: String,
    },

    /// The log service failed a non-submission call (create, fetch).
    #[error("log service call on '{log_id}' failed")]
    LogService {
        log_id: String,
        #[source]
        source: LogServiceError,
    },

    /// The caller's deadline passed before the operation completed.
    #[error("deadline exceeded during {operation} on log '{log_id}'")]
    DeadlineExceeded { log_id: String, operation: String },

    /// Refused to continue a chain that failed verification.
    #[error("chain for subject '{subject_id}' on log '{log_id}' is broken at {} point(s)", .breaks.len())]
    BrokenChain {
        log_id: String,
        subject_id: String,
        breaks: Vec<ChainBreak>,
    },

    /// A configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl ChainlogError {
    /// True when the failure is about reaching the log service ("retry
    /// later") rather than about the caller's input or the chain's integrity.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            ChainlogError::Submission { .. }
                | ChainlogError::PartialSubmission { .. }
                | ChainlogError::AmbiguousSubmission { .. }
                | ChainlogError::IncompleteChunkGroup { .. }
                | ChainlogError::LogService { .. }
                | ChainlogError::DeadlineExceeded { .. }
        )
    }
}

/// Convenience alias used throughout the chainlog crates.
pub type ChainlogResult<T> = Result<T, ChainlogError>;
