//! Scenario 2: Tamper Detection
//!
//! `agent-1` logs a login and a transfer. An attacker with write access to
//! the service's storage then rewrites the transfer's `previousRecordHash`.
//!
//! Pipeline walk-through for the demo run:
//!   1. Two chained records are submitted; the chain verifies
//!   2. The stored bytes of record 2 are rewritten in place
//!   3. Verification reports exactly one break at sequence 2, with the
//!      expected (record 1's hash) and observed (forged) values
//!   4. `chain_head` refuses to continue the broken chain

use chainlog_audit::{ChainTip, RecordBuilder};
use chainlog_contracts::{
    error::{ChainlogError, ChainlogResult},
    log::CreateLogRequest,
    record::RecordKind,
    verify::{ChainBreak, VerificationReport},
};
use chainlog_core::config::ClientConfig;

use crate::mock_data::{login_then_transfer, TAMPER_AGENT};
use crate::{in_memory_client, short};

/// What the scenario observed.
#[derive(Debug)]
pub struct TamperOutcome {
    /// Hash of the login record, the value record 2 should link to.
    pub login_hash: String,
    /// The value written over record 2's link.
    pub forged_link: String,
    pub before: VerificationReport,
    pub after: VerificationReport,
    /// Breaks carried by the `BrokenChain` refusal, if `chain_head` refused.
    pub refused_with: Option<Vec<ChainBreak>>,
}

/// Log the two records, tamper with the second and verify before and after.
pub async fn tamper_and_verify(config: &ClientConfig) -> ChainlogResult<TamperOutcome> {
    let (service, client) = in_memory_client(config)?;
    let log = client.create_log(CreateLogRequest::new("agent-1 activity")).await?;

    let builder = RecordBuilder::new();
    let mut tip = ChainTip::genesis(TAMPER_AGENT);
    let [login, transfer] = login_then_transfer();
    client
        .attest(&log, &builder, &mut tip, RecordKind::Custom, login)
        .await?;
    let login_hash = tip.head_hash.clone();
    let logged = client
        .attest(&log, &builder, &mut tip, RecordKind::Custom, transfer)
        .await?;

    let before = client.verify_subject(&log, TAMPER_AGENT).await?;

    let forged_link = "5a".repeat(32);
    let rewritten = service.tamper(&log.log_id, logged.sequence_number, |bytes| {
        let text = String::from_utf8_lossy(bytes).replace(&login_hash, &forged_link);
        *bytes = text.into_bytes();
    });
    if !rewritten {
        return Err(ChainlogError::Validation {
            reason: format!("sequence {} not found on {}", logged.sequence_number, log.log_id),
        });
    }

    let after = client.verify_subject(&log, TAMPER_AGENT).await?;
    let refused_with = match client.chain_head(&log, TAMPER_AGENT).await {
        Err(ChainlogError::BrokenChain { breaks, .. }) => Some(breaks),
        Ok(_) => None,
        Err(other) => return Err(other),
    };

    Ok(TamperOutcome {
        login_hash,
        forged_link,
        before,
        after,
        refused_with,
    })
}

/// Run Scenario 2: Tamper Detection.
pub async fn run_scenario(config: &ClientConfig) -> ChainlogResult<()> {
    println!("=== Scenario 2: Tamper Detection ===");
    println!();

    let outcome = tamper_and_verify(config).await?;

    println!(
        "  Before tampering:  {} ({} record(s))",
        if outcome.before.valid { "VALID" } else { "BROKEN" },
        outcome.before.record_count
    );
    println!("  Rewrote record 2 link: {} -> {}", short(&outcome.login_hash), short(&outcome.forged_link));
    println!(
        "  After tampering:   {} ({} break(s))",
        if outcome.after.valid { "VALID" } else { "BROKEN" },
        outcome.after.breaks.len()
    );
    for brk in &outcome.after.breaks {
        println!("    {}", brk);
    }
    println!(
        "  Continue chain:    {}",
        if outcome.refused_with.is_some() { "REFUSED" } else { "ALLOWED" }
    );
    println!();
    println!("  Scenario 2 complete.");
    println!();

    Ok(())
}
