//! # chainlog-audit
//!
//! The record-level machinery of the chainlog attestation client.
//!
//! ## Overview
//!
//! Every attestation record commits to its predecessor by SHA-256 hash over
//! a canonical serialization. Tampering with any record (even a single
//! byte of its payload) breaks the link from its successor.
//!
//! - `chain`  : canonical serialization and record hashing
//! - `builder`: the Record Builder and the caller-held `ChainTip`
//! - `chunk`  : framing of oversized records into chunk groups and their
//!   reassembly
//! - `memory` : `InMemoryLogService`, the reference `AppendOnlyLog`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chainlog_audit::{ChainTip, RecordBuilder};
//! use chainlog_contracts::record::RecordKind;
//!
//! let builder = RecordBuilder::new();
//! let mut tip = ChainTip::genesis("agent-1");
//! let built = tip.next(&builder, RecordKind::Custom, json!({ "action": "login" }))?;
//! // submit built.record, then:
//! tip.advance(&built);
//! ```

pub mod builder;
pub mod chain;
pub mod chunk;
pub mod memory;

pub use builder::{BuiltRecord, ChainTip, RecordBuilder};
pub use chain::{canonical_bytes, record_hash, sha256_hex};
pub use memory::InMemoryLogService;

// ── Tests ─────────────────────────────────────────────────────────────────────
