//! Simulated agent activity for the chainlog reference scenarios.
//!
//! Everything here is hardcoded and fictional. Sensitive material (prompts,
//! model outputs, datasets, weights) is represented only by its SHA-256, the
//! way a production agent would attest it.

use serde_json::{json, Value};

use chainlog_audit::sha256_hex;
use chainlog_contracts::record::RecordKind;

// ── Agent session ─────────────────────────────────────────────────────────────

/// The subject of the agent session scenario.
pub const SESSION_AGENT: &str = "support-agent-042";

/// Model the session agent runs on.
pub const SESSION_MODEL: &str = "assist-llm-3b";

/// One support session: login, a model answer, a refund decision and the
/// resulting refund transaction.
pub fn agent_session_steps() -> Vec<(RecordKind, Value)> {
    let prompt = "Customer 7781 asks why order 55-2190 was charged twice.";
    let answer = "Order 55-2190 was captured twice by the card processor; one capture is refundable.";

    vec![
        (
            RecordKind::Custom,
            json!({ "action": "login", "channel": "chat", "tenant": "acme-retail" }),
        ),
        (
            RecordKind::Output,
            json!({
                "modelId": SESSION_MODEL,
                "inputHash": sha256_hex(prompt.as_bytes()),
                "outputHash": sha256_hex(answer.as_bytes()),
                "latencyMs": 412,
            }),
        ),
        (
            RecordKind::Decision,
            json!({
                "decision": "refund-duplicate-capture",
                "confidence": 0.97,
                "policy": "refunds-v4",
            }),
        ),
        (
            RecordKind::Transaction,
            json!({
                "transactionId": "rf-55-2190-01",
                "amount": 49.90,
                "currency": "EUR",
            }),
        ),
    ]
}

// ── Tamper example ────────────────────────────────────────────────────────────

/// Subject of the two-record tamper example.
pub const TAMPER_AGENT: &str = "agent-1";

/// A login followed by a transfer.
pub fn login_then_transfer() -> [Value; 2] {
    [
        json!({ "action": "login" }),
        json!({ "action": "transfer", "amount": 10 }),
    ]
}

// ── Model deployment ──────────────────────────────────────────────────────────

/// Subject of the deployment scenario.
pub const DEPLOYED_MODEL: &str = "fraud-scorer-7";

/// Number of weight shards listed in the deployment manifest.
pub const MANIFEST_SHARDS: usize = 48;

/// Training data attestation for the deployed model.
pub fn training_data() -> Value {
    json!({
        "datasetHash": sha256_hex(b"transactions-2025-q1..q3, 41.2M rows, deduplicated"),
        "rows": 41_200_000u64,
        "license": "internal",
    })
}

/// A deployment record carrying a per-shard manifest. Its canonical form is
/// several kilobytes, well above a single log message.
pub fn deployment_manifest(version: &str) -> Value {
    let shards: Vec<Value> = (0..MANIFEST_SHARDS)
        .map(|i| {
            let name = format!("{DEPLOYED_MODEL}/{version}/shard-{i:03}.safetensors");
            json!({ "name": name, "digest": sha256_hex(name.as_bytes()), "bytes": 268_435_456u64 })
        })
        .collect();

    let manifest = json!(shards);
    json!({
        "modelId": DEPLOYED_MODEL,
        "modelHash": sha256_hex(manifest.to_string().as_bytes()),
        "version": version,
        "environment": "production-eu",
        "shards": manifest,
    })
}

// ── Payments ──────────────────────────────────────────────────────────────────

/// Payment agents whose records interleave on one log.
pub const PAYMENT_AGENTS: [&str; 3] = ["payments-agent-a", "payments-agent-b", "payments-agent-c"];

/// Payments settled by each agent, in order.
pub fn payments_for(agent: &str) -> Vec<Value> {
    let (prefix, amounts): (&str, &[f64]) = match agent {
        "payments-agent-a" => ("pa", &[120.00, 35.50, 980.00, 12.75]),
        "payments-agent-b" => ("pb", &[64.10, 64.10, 5.00]),
        "payments-agent-c" => ("pc", &[2_500.00, 18.99, 42.00, 7.25, 310.40]),
        _ => ("px", &[]),
    };

    amounts
        .iter()
        .enumerate()
        .map(|(i, amount)| {
            json!({
                "transactionId": format!("{prefix}-{:04}", i + 1),
                "amount": amount,
                "currency": "USD",
            })
        })
        .collect()
}
