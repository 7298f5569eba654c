//! chainlog Attestation Reference: Demo CLI
//!
//! Runs the reference agent scenarios against an in-memory log service,
//! exports a sample log as JSON, and verifies exported logs offline.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- tamper
//!   cargo run -p demo -- --config client.toml model-deployment
//!   cargo run -p demo -- export --out session.json
//!   cargo run -p demo -- verify --file session.json --subject support-agent-042

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chainlog_contracts::error::ChainlogResult;
use chainlog_core::config::ClientConfig;
use chainlog_ref_agents::scenarios::{
    agent_session, ambiguous_submission, model_deployment, payment_trail, tamper_detection,
};
use chainlog_verify::engine::{parse_export, ChainVerifier, VerifyOptions};

// ── CLI definition ────────────────────────────────────────────────────────────

/// chainlog: hash-chained attestation logs on an append-only log service.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "chainlog attestation reference demo",
    long_about = "Runs chainlog reference scenarios showing chained submission, chunking,\n\
                  tamper detection, ambiguous submissions and offline verification."
)]
struct Cli {
    /// Client configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all five scenarios in sequence.
    RunAll,
    /// Scenario 1: Agent Session (schema-validated chain, resume from head).
    AgentSession,
    /// Scenario 2: Tamper Detection (one rewritten link, one break).
    Tamper,
    /// Scenario 3: Model Deployment (chunked record, reassembled on fetch).
    ModelDeployment,
    /// Scenario 4: Payment Trail (concurrent, interleaved subjects).
    Payments,
    /// Scenario 5: Ambiguous Submission (late ack reconciled by fetch).
    Ambiguous,
    /// Record a sample session and write its logged records as JSON.
    Export {
        #[arg(long)]
        out: PathBuf,
    },
    /// Verify an exported JSON log. Exits non-zero when a chain is broken.
    Verify {
        #[arg(long)]
        file: PathBuf,
        /// Verify only this subject. Every subject is verified otherwise.
        #[arg(long)]
        subject: Option<String>,
        /// Expected hash of the subject's last record. Requires --subject.
        #[arg(long, requires = "subject")]
        expected_head: Option<String>,
        /// Stop at the first break of each chain.
        #[arg(long)]
        stop_at_first: bool,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize structured logging.  Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Verify {
            file,
            subject,
            expected_head,
            stop_at_first,
        } => match verify_file(&file, subject, expected_head, stop_at_first) {
            Ok(true) => Ok(()),
            Ok(false) => process::exit(1),
            Err(e) => Err(e),
        },
        Command::Export { out } => export(&config, &out).await,
        scenario => {
            print_banner();
            run_scenarios(scenario, &config).await.map_err(|e| e.to_string())
        }
    };

    if let Err(e) = result {
        eprintln!("Demo error: {}", e);
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> ChainlogResult<ClientConfig> {
    match path {
        Some(path) => ClientConfig::from_file(path),
        None => Ok(ClientConfig::default()),
    }
}

// ── Scenario dispatch ─────────────────────────────────────────────────────────

async fn run_scenarios(command: Command, config: &ClientConfig) -> ChainlogResult<()> {
    match command {
        Command::RunAll => chainlog_ref_agents::run_all(config).await?,
        Command::AgentSession => agent_session::run_scenario(config).await?,
        Command::Tamper => tamper_detection::run_scenario(config).await?,
        Command::ModelDeployment => model_deployment::run_scenario(config).await?,
        Command::Payments => payment_trail::run_scenario(config).await?,
        Command::Ambiguous => ambiguous_submission::run_scenario(config).await?,
        Command::Export { .. } | Command::Verify { .. } => return Ok(()),
    }
    println!("All selected scenarios completed successfully.");
    Ok(())
}

// ── Export and verify ─────────────────────────────────────────────────────────

async fn export(config: &ClientConfig, out: &Path) -> Result<(), String> {
    let records = chainlog_ref_agents::export_sample_log(config)
        .await
        .map_err(|e| e.to_string())?;
    let json = serde_json::to_vec_pretty(&records).map_err(|e| e.to_string())?;
    std::fs::write(out, json).map_err(|e| format!("cannot write {}: {}", out.display(), e))?;

    info!(path = %out.display(), records = records.len(), "log exported");
    println!("Exported {} record(s) to {}", records.len(), out.display());
    Ok(())
}

/// Verify an exported log. Returns whether every verified chain is intact.
fn verify_file(
    file: &Path,
    subject: Option<String>,
    expected_head: Option<String>,
    stop_at_first: bool,
) -> Result<bool, String> {
    let bytes = std::fs::read(file).map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
    let records = parse_export(&bytes).map_err(|e| e.to_string())?;

    let verifier = ChainVerifier::with_options(VerifyOptions {
        stop_at_first_break: stop_at_first,
        expected_head,
    });

    let reports = match subject {
        Some(subject) => vec![verifier.verify_subject(&records, &subject)],
        None => verifier.verify_by_subject(&records).into_values().collect(),
    };

    let mut intact = true;
    for report in &reports {
        let subject = report.subject_id.as_deref().unwrap_or("<none>");
        println!(
            "{}: {} ({} record(s), head {})",
            subject,
            if report.valid { "VALID" } else { "BROKEN" },
            report.record_count,
            report.head_hash.as_deref().unwrap_or("-")
        );
        for brk in &report.breaks {
            println!("  {}", brk);
        }
        intact &= report.valid;
    }
    if reports.is_empty() {
        println!("No records in {}", file.display());
    }
    Ok(intact)
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("chainlog: Hash-Chained Attestation Logs");
    println!("Agent Reference Demo");
    println!("========================================");
    println!();
    println!("Per record:");
    println!("  [1] Payload validated (reserved keys, secrets, JSON Schema per kind)");
    println!("  [2] Canonical JSON (sorted keys) hashed with SHA-256");
    println!("  [3] Linked to the subject's previous record hash (genesis = 64 zeros)");
    println!("  [4] Submitted with bounded retries; chunked above the message size");
    println!("  [5] Fetched, reassembled and verified per subject");
    println!();
}
