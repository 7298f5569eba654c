//! Trait seams between the chainlog client and the outside world.
//!
//! - `AppendOnlyLog`   : the external ordered message service (untrusted
//!   for integrity; trusted only for ordering)
//! - `PayloadValidator`: kind-specific payload rules applied by the builder
//!
//! Vendor specifics live behind `AppendOnlyLog` implementations. Nothing in
//! the builder or verifier sees a vendor type.

use async_trait::async_trait;

use chainlog_contracts::{
    error::{ChainlogResult, LogServiceError},
    log::{CreateLogRequest, LogHandle, LogPage, PageRequest, SubmitReceipt},
    record::{Payload, RecordKind},
};

/// An external append-only, ordered message service.
///
/// Payloads are opaque bytes to the service. Implementations must assign
/// strictly increasing sequence numbers (starting at 1) and non-decreasing
/// consensus timestamps per log, and serve pages in ascending order.
///
/// Every method may suspend on I/O. Callers bound them with deadlines; an
/// implementation must tolerate its future being dropped mid-call.
#[async_trait]
pub trait AppendOnlyLog: Send + Sync {
    /// Create a new empty log.
    ///
    /// The returned handle carries the submit capability from `request`, so
    /// the creator can append immediately.
    async fn create_log(&self, request: CreateLogRequest) -> Result<LogHandle, LogServiceError>;

    /// Append one message (a whole record or one chunk of a record).
    ///
    /// Fails with `Unauthorized` when the log requires a submit capability
    /// the handle does not present, and with `Rejected` for oversized
    /// messages.
    async fn submit(&self, log: &LogHandle, message: Vec<u8>) -> Result<SubmitReceipt, LogServiceError>;

    /// Read one page of committed messages.
    async fn fetch_page(&self, log: &LogHandle, request: PageRequest) -> Result<LogPage, LogServiceError>;
}

/// Kind-specific payload rules.
///
/// Implementations are pure: no I/O, deterministic for a given input.
pub trait PayloadValidator: Send + Sync {
    /// Return `Err(ChainlogError::Validation)` describing every violation,
    /// or `Ok(())` when the payload is acceptable for `kind`.
    fn validate(&self, kind: RecordKind, payload: &Payload) -> ChainlogResult<()>;
}
