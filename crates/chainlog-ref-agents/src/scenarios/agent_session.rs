//! Scenario 1: Agent Session
//!
//! A support agent attests one customer session as a four-record chain:
//! login, a model answer (prompt and answer hashed), a refund decision and
//! the refund transaction.
//!
//! Pipeline walk-through for the demo run:
//!   1. Each payload is checked against the built-in schema of its kind
//!   2. Records are chained from the genesis sentinel and submitted
//!   3. The chain is fetched back and verified
//!   4. `chain_head` recovers the tip a restarted agent would continue from

use serde_json::Value;

use chainlog_audit::ChainTip;
use chainlog_client::AttestationClient;
use chainlog_contracts::{
    error::ChainlogResult,
    log::{CreateLogRequest, LogHandle},
    record::LoggedRecord,
};
use chainlog_core::{config::ClientConfig, traits::AppendOnlyLog};

use crate::mock_data::{agent_session_steps, SESSION_AGENT};
use crate::{in_memory_client, schema_builder, short};

/// Attest the session on `log`. Returns the final tip and the logged records.
pub async fn record_session<L: AppendOnlyLog + ?Sized + 'static>(
    client: &AttestationClient<L>,
    log: &LogHandle,
) -> ChainlogResult<(ChainTip, Vec<LoggedRecord>)> {
    let builder = schema_builder()?;
    let mut tip = ChainTip::genesis(SESSION_AGENT);
    let mut logged = Vec::new();
    for (kind, payload) in agent_session_steps() {
        logged.push(client.attest(log, &builder, &mut tip, kind, payload).await?);
    }
    Ok((tip, logged))
}

/// Run Scenario 1: Agent Session.
pub async fn run_scenario(config: &ClientConfig) -> ChainlogResult<()> {
    println!("=== Scenario 1: Agent Session ===");
    println!();

    let (_, client) = in_memory_client(config)?;
    let log = client
        .create_log(CreateLogRequest::new("support agent sessions"))
        .await?;

    println!("  Log:     {}", log.log_id);
    println!("  Subject: {}", SESSION_AGENT);
    println!();

    let (tip, logged) = record_session(&client, &log).await?;
    for record in &logged {
        println!(
            "  #{:<3} {:<12} {}",
            record.sequence_number,
            record.record.kind.as_str(),
            summary(&record.record.payload)
        );
    }
    println!();

    let report = client.verify_subject(&log, SESSION_AGENT).await?;
    println!(
        "  Chain verification:  {} ({} record(s))",
        if report.valid { "VALID" } else { "BROKEN" },
        report.record_count
    );

    let resumed = client.chain_head(&log, SESSION_AGENT).await?;
    println!("  Head hash:           {}", short(&resumed.head_hash));
    println!(
        "  Resumed tip matches: {}",
        if resumed == tip { "YES" } else { "NO" }
    );
    println!();
    println!("  Scenario 1 complete.");
    println!();

    Ok(())
}

/// The first interesting payload field, for display.
fn summary(payload: &serde_json::Map<String, Value>) -> String {
    ["action", "modelId", "decision", "transactionId"]
        .iter()
        .find_map(|key| payload.get(*key).map(|v| format!("{key}={v}")))
        .unwrap_or_default()
}
