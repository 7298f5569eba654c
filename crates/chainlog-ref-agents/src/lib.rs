//! # chainlog-ref-agents
//!
//! Reference agents for the chainlog attestation client.
//!
//! Demonstrates five scenarios against the in-memory log service:
//!
//! 1. **Agent Session**: a schema-validated four-record chain and resuming
//!    it with `chain_head`.
//! 2. **Tamper Detection**: a rewritten link found as exactly one break.
//! 3. **Model Deployment**: an oversized record chunked and reassembled.
//! 4. **Payment Trail**: concurrent agents interleaving on one log.
//! 5. **Ambiguous Submission**: a late acknowledgement reconciled by
//!    reading the log.
//!
//! All data is hardcoded and fictional. No external services are contacted.

pub mod mock_data;
pub mod scenarios;

use std::sync::Arc;

use chainlog_audit::{InMemoryLogService, RecordBuilder};
use chainlog_client::{AttestationClient, FetchQuery};
use chainlog_contracts::{
    error::ChainlogResult,
    log::CreateLogRequest,
    record::LoggedRecord,
};
use chainlog_core::config::ClientConfig;
use chainlog_verify::SchemaPayloadValidator;

/// A record builder enforcing the built-in payload schemas.
pub fn schema_builder() -> ChainlogResult<RecordBuilder> {
    let validator = SchemaPayloadValidator::with_builtin_schemas()?;
    Ok(RecordBuilder::with_validator(Box::new(validator)))
}

/// First 12 hex digits of a hash, for display.
pub fn short(hash: &str) -> String {
    hash.chars().take(12).collect()
}

/// A fresh in-memory log service and a client on it under `config`.
///
/// The service accepts messages as large as the client is configured to
/// send.
pub fn in_memory_client(
    config: &ClientConfig,
) -> ChainlogResult<(InMemoryLogService, AttestationClient<InMemoryLogService>)> {
    let service = InMemoryLogService::with_max_message_bytes(config.chunking.max_message_bytes);
    let client = AttestationClient::with_config(Arc::new(service.clone()), config.clone())?;
    Ok((service, client))
}

/// Run every scenario in order under `config`.
pub async fn run_all(config: &ClientConfig) -> ChainlogResult<()> {
    scenarios::agent_session::run_scenario(config).await?;
    scenarios::tamper_detection::run_scenario(config).await?;
    scenarios::model_deployment::run_scenario(config).await?;
    scenarios::payment_trail::run_scenario(config).await?;
    scenarios::ambiguous_submission::run_scenario(config).await?;
    Ok(())
}

/// Record an agent session on a fresh in-memory log under `config` and
/// return every logged record, ready to be written out as JSON and checked
/// later with the verifier.
pub async fn export_sample_log(config: &ClientConfig) -> ChainlogResult<Vec<LoggedRecord>> {
    let (_, client) = in_memory_client(config)?;
    let log = client.create_log(CreateLogRequest::new("exported sample")).await?;
    scenarios::agent_session::record_session(&client, &log).await?;
    Ok(client.fetch_all(&log, FetchQuery::all()).await?.records)
}
