//! Scenario 4: Payment Trail
//!
//! Three payment agents settle transactions at the same time and attest them
//! to one shared log. Their records interleave; each agent keeps its own
//! chain tip, and the client itself is shared without locks.
//!
//! Pipeline walk-through for the demo run:
//!   1. Agents submit concurrently through one `AttestationClient`
//!   2. The whole log is fetched once
//!   3. Every subject's chain is verified independently
//!   4. Verifying the raw interleaved stream as one chain would report
//!      breaks; per-subject verification is required

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use tracing::info;

use chainlog_audit::{ChainTip, InMemoryLogService};
use chainlog_client::{AttestationClient, FetchQuery};
use chainlog_contracts::{
    error::ChainlogResult,
    log::{CreateLogRequest, LogHandle},
    record::{LoggedRecord, RecordKind},
    verify::VerificationReport,
};
use chainlog_core::config::ClientConfig;
use chainlog_verify::ChainVerifier;

use crate::mock_data::{payments_for, PAYMENT_AGENTS};
use crate::{in_memory_client, schema_builder};

/// What the scenario observed.
#[derive(Debug)]
pub struct PaymentOutcome {
    /// Every record on the log, in log order.
    pub records: Vec<LoggedRecord>,
    /// Final tip of each agent.
    pub tips: Vec<ChainTip>,
    pub by_subject: BTreeMap<String, VerificationReport>,
    /// Report for the unfiltered log treated as one chain.
    pub unfiltered: VerificationReport,
}

/// Attest all payments of one agent, in order.
async fn settle(
    client: &AttestationClient<InMemoryLogService>,
    log: &LogHandle,
    agent: &str,
) -> ChainlogResult<ChainTip> {
    let builder = schema_builder()?;
    let mut tip = ChainTip::genesis(agent);
    for payment in payments_for(agent) {
        client
            .attest(log, &builder, &mut tip, RecordKind::Transaction, payment)
            .await?;
    }
    info!(subject_id = %agent, head = %tip.head_hash, "payments attested");
    Ok(tip)
}

/// Run all payment agents concurrently against one log.
pub async fn run_payments(config: &ClientConfig) -> ChainlogResult<PaymentOutcome> {
    let (service, client) = in_memory_client(config)?;
    // A slow acknowledgement yields between submissions so agents interleave.
    service.set_ack_delay(Some(Duration::from_millis(2)));
    let log = client.create_log(CreateLogRequest::new("payments")).await?;

    let tips = join_all(PAYMENT_AGENTS.iter().map(|agent| settle(&client, &log, agent)))
        .await
        .into_iter()
        .collect::<ChainlogResult<Vec<ChainTip>>>()?;

    let records = client.fetch_all(&log, FetchQuery::all()).await?.records;
    let verifier = ChainVerifier::new();
    let by_subject = verifier.verify_by_subject(&records);
    let unfiltered = verifier.verify(&records);

    Ok(PaymentOutcome {
        records,
        tips,
        by_subject,
        unfiltered,
    })
}

/// Run Scenario 4: Payment Trail.
pub async fn run_scenario(config: &ClientConfig) -> ChainlogResult<()> {
    println!("=== Scenario 4: Payment Trail ===");
    println!();

    let outcome = run_payments(config).await?;

    let order: Vec<String> = outcome
        .records
        .iter()
        .take(9)
        .map(|r| r.subject_id().trim_start_matches("payments-agent-").to_string())
        .collect();
    println!("  Records on log:      {}", outcome.records.len());
    println!("  Arrival order:       {} ...", order.join(" "));
    println!();

    for (subject, report) in &outcome.by_subject {
        println!(
            "  {:<18} {} ({} record(s))",
            subject,
            if report.valid { "VALID" } else { "BROKEN" },
            report.record_count
        );
    }
    println!(
        "  Unfiltered stream:  {} break(s) when verified as a single chain",
        outcome.unfiltered.breaks.len()
    );
    println!();
    println!("  Scenario 4 complete.");
    println!();

    Ok(())
}
