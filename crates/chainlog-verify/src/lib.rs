//! # chainlog-verify
//!
//! Verification for chainlog attestation records.
//!
//! - [`engine::ChainVerifier`] walks a subject's records and reports every
//!   chain break: hash linkage, sequence and timestamp ordering, and an
//!   optional head anchor. Broken chains are findings, not errors.
//! - [`schema::SchemaPayloadValidator`] implements
//!   [`chainlog_core::traits::PayloadValidator`] with per-kind JSON Schemas
//!   via the `jsonschema` crate.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use chainlog_verify::engine::ChainVerifier;
//!
//! let report = ChainVerifier::new().verify_subject(&records, "agent-1");
//! for brk in &report.breaks {
//!     eprintln!("{brk}");
//! }
//! ```

pub mod engine;
pub mod schema;

pub use engine::{ChainVerifier, VerifyOptions};
pub use schema::SchemaPayloadValidator;
