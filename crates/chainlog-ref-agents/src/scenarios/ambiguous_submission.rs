//! Scenario 5: Ambiguous Submission
//!
//! The log service commits a record but its acknowledgement arrives after
//! the agent's deadline. The client reports the submission as ambiguous,
//! never as success or failure, and the agent reconciles by reading the log
//! before deciding whether to resend.
//!
//! Pipeline walk-through for the demo run:
//!   1. Submit with a deadline shorter than the service's ack delay
//!   2. `AmbiguousSubmission` is returned; the tip is not advanced
//!   3. The agent fetches its subject and finds the record by hash
//!   4. The tip advances past it and the chain continues without a
//!      duplicate

use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use chainlog_audit::{record_hash, ChainTip, InMemoryLogService, RecordBuilder};
use chainlog_client::{AttestationClient, FetchQuery};
use chainlog_contracts::{
    error::{ChainlogError, ChainlogResult},
    log::{CreateLogRequest, LogHandle},
    record::{AttestationRecord, RecordKind},
    verify::VerificationReport,
};
use chainlog_core::config::ClientConfig;

use crate::{in_memory_client, short};

/// Subject of the scenario.
pub const AGENT: &str = "settlement-agent-9";

/// How the agent resolved the ambiguous submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The record was found on the log; the tip advanced past it.
    FoundOnLog,
    /// The record was not on the log and was submitted again.
    Resubmitted,
    /// The first submission was acknowledged in time.
    NotAmbiguous,
}

/// What the scenario observed.
#[derive(Debug)]
pub struct AmbiguityOutcome {
    pub resolution: Resolution,
    pub report: VerificationReport,
}

/// Resolve a possibly committed record: advance `tip` if `record` is on the
/// log, otherwise submit it again.
pub async fn reconcile(
    client: &AttestationClient<InMemoryLogService>,
    log: &LogHandle,
    tip: &mut ChainTip,
    record: &AttestationRecord,
) -> ChainlogResult<Resolution> {
    let wanted = record_hash(record);
    let fetched = client.fetch_all(log, FetchQuery::subject(&tip.subject_id)).await?;
    let found = fetched
        .records
        .iter()
        .any(|logged| record_hash(&logged.record) == wanted);

    let resolution = if found {
        Resolution::FoundOnLog
    } else {
        client.submit(log, record).await?;
        Resolution::Resubmitted
    };
    tip.head_hash = wanted;
    info!(subject_id = %tip.subject_id, resolution = ?resolution, "ambiguous submission reconciled");
    Ok(resolution)
}

/// Submit under a deadline shorter than the ack delay, reconcile, continue.
pub async fn submit_and_reconcile(config: &ClientConfig) -> ChainlogResult<AmbiguityOutcome> {
    let (service, client) = in_memory_client(config)?;
    let log = client.create_log(CreateLogRequest::new("settlements")).await?;

    let builder = RecordBuilder::new();
    let mut tip = ChainTip::genesis(AGENT);
    let built = tip.next(
        &builder,
        RecordKind::Transaction,
        serde_json::json!({ "transactionId": "st-0001", "amount": 1_250.0, "currency": "GBP" }),
    )?;

    service.set_ack_delay(Some(Duration::from_millis(300)));
    let first = client
        .submit_by(&log, &built.record, Instant::now() + Duration::from_millis(50))
        .await;
    service.set_ack_delay(None);

    let resolution = match first {
        Ok(_) => {
            tip.advance(&built);
            Resolution::NotAmbiguous
        }
        Err(ChainlogError::AmbiguousSubmission { .. }) => {
            reconcile(&client, &log, &mut tip, &built.record).await?
        }
        Err(other) => return Err(other),
    };

    client
        .attest(
            &log,
            &builder,
            &mut tip,
            RecordKind::Transaction,
            serde_json::json!({ "transactionId": "st-0002", "amount": 80.0, "currency": "GBP" }),
        )
        .await?;

    let report = client.verify_subject(&log, AGENT).await?;
    Ok(AmbiguityOutcome { resolution, report })
}

/// Run Scenario 5: Ambiguous Submission.
pub async fn run_scenario(config: &ClientConfig) -> ChainlogResult<()> {
    println!("=== Scenario 5: Ambiguous Submission ===");
    println!();
    println!("  Service ack delay:   300ms");
    println!("  Client deadline:     50ms");
    println!();

    let outcome = submit_and_reconcile(config).await?;

    let resolution = match outcome.resolution {
        Resolution::FoundOnLog => "AMBIGUOUS -> record found on log, not resent",
        Resolution::Resubmitted => "AMBIGUOUS -> record missing, resubmitted",
        Resolution::NotAmbiguous => "acknowledged in time",
    };
    println!("  First submission:    {}", resolution);
    println!(
        "  Chain verification:  {} ({} record(s), head {})",
        if outcome.report.valid { "VALID" } else { "BROKEN" },
        outcome.report.record_count,
        outcome.report.head_hash.as_deref().map(short).unwrap_or_default()
    );
    println!();
    println!("  Scenario 5 complete.");
    println!();

    Ok(())
}
