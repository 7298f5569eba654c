//! Scenario 3: Model Deployment
//!
//! A model registry attests the training data of `fraud-scorer-7` and then
//! its production deployment. The deployment record carries a per-shard
//! manifest far larger than one log message, so the client sends it as a
//! chunk group and reassembles it on fetch.
//!
//! Pipeline walk-through for the demo run:
//!   1. TRAINING_DATA record (single message)
//!   2. MODEL_DEPLOYMENT record (chunked)
//!   3. Fetch reassembles the manifest; the hash matches what was built
//!   4. The chain verifies across the single-part and chunked records

use chainlog_audit::{record_hash, ChainTip};
use chainlog_client::FetchQuery;
use chainlog_contracts::{
    error::ChainlogResult,
    log::CreateLogRequest,
    record::{LoggedRecord, RecordKind},
    verify::VerificationReport,
};
use chainlog_core::config::ClientConfig;

use crate::mock_data::{deployment_manifest, training_data, DEPLOYED_MODEL};
use crate::{in_memory_client, schema_builder, short};

/// What the scenario observed.
#[derive(Debug)]
pub struct DeploymentOutcome {
    /// Log messages used for both records.
    pub messages: usize,
    /// Records as submitted.
    pub submitted: Vec<LoggedRecord>,
    /// Records as fetched back.
    pub fetched: Vec<LoggedRecord>,
    pub report: VerificationReport,
}

/// Attest training data and deployment, then read both back.
pub async fn deploy(config: &ClientConfig, version: &str) -> ChainlogResult<DeploymentOutcome> {
    let (service, client) = in_memory_client(config)?;
    let log = client.create_log(CreateLogRequest::new("model registry")).await?;

    let builder = schema_builder()?;
    let mut tip = ChainTip::genesis(DEPLOYED_MODEL);
    let training = client
        .attest(&log, &builder, &mut tip, RecordKind::TrainingData, training_data())
        .await?;
    let deployment = client
        .attest(
            &log,
            &builder,
            &mut tip,
            RecordKind::ModelDeployment,
            deployment_manifest(version),
        )
        .await?;

    let fetched = client.fetch_all(&log, FetchQuery::subject(DEPLOYED_MODEL)).await?;
    let report = client.verify_subject(&log, DEPLOYED_MODEL).await?;

    Ok(DeploymentOutcome {
        messages: service.messages(&log.log_id).len(),
        submitted: vec![training, deployment],
        fetched: fetched.records,
        report,
    })
}

/// Run Scenario 3: Model Deployment.
pub async fn run_scenario(config: &ClientConfig) -> ChainlogResult<()> {
    println!("=== Scenario 3: Model Deployment ===");
    println!();

    let outcome = deploy(config, "2.4.0").await?;

    for record in &outcome.submitted {
        println!(
            "  Submitted {:<16} seq {:<3} hash {}",
            record.record.kind.as_str(),
            record.sequence_number,
            short(&record_hash(&record.record))
        );
    }
    println!(
        "  Log messages used:   {} for {} record(s)",
        outcome.messages,
        outcome.submitted.len()
    );

    let intact = outcome.fetched.len() == outcome.submitted.len()
        && outcome
            .fetched
            .iter()
            .zip(&outcome.submitted)
            .all(|(a, b)| record_hash(&a.record) == record_hash(&b.record));
    println!(
        "  Reassembly:          {}",
        if intact { "HASHES MATCH" } else { "MISMATCH" }
    );
    println!(
        "  Chain verification:  {} ({} record(s))",
        if outcome.report.valid { "VALID" } else { "BROKEN" },
        outcome.report.record_count
    );
    println!();
    println!("  Scenario 3 complete.");
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use chainlog_audit::record_hash;
    use chainlog_core::config::ClientConfig;

    use super::deploy;

    #[tokio::test]
    async fn manifest_is_chunked_and_reassembled() {
        let outcome = deploy(&ClientConfig::default(), "2.4.0").await.unwrap();

        assert!(outcome.messages > outcome.submitted.len());
        assert_eq!(outcome.fetched, outcome.submitted);
        assert_eq!(
            record_hash(&outcome.fetched[1].record),
            record_hash(&outcome.submitted[1].record)
        );
        // The deployment's receipt is that of its final chunk.
        assert_eq!(outcome.submitted[1].sequence_number, outcome.messages as u64);

        assert!(outcome.report.valid);
        assert_eq!(outcome.report.record_count, 2);
    }

    #[tokio::test]
    async fn chunk_size_follows_the_client_config() {
        let default = deploy(&ClientConfig::default(), "2.4.0").await.unwrap();

        let mut config = ClientConfig::default();
        config.chunking.max_message_bytes = 4096;
        let larger = deploy(&config, "2.4.0").await.unwrap();

        assert!(larger.messages < default.messages);
        assert_eq!(larger.fetched, larger.submitted);
        assert!(larger.report.valid);
    }
}
