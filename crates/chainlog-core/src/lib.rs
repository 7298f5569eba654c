//! # chainlog-core
//!
//! The seams of the chainlog attestation client.
//!
//! This crate provides:
//! - The two core traits (`AppendOnlyLog`, `PayloadValidator`)
//! - `ClientConfig`, the TOML-loadable retry, chunking, fetch and deadline
//!   settings shared by the submitter and fetcher
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chainlog_core::{ClientConfig, traits::AppendOnlyLog};
//!
//! let config = ClientConfig::from_file(Path::new("chainlog.toml"))?;
//! ```

pub mod config;
pub mod traits;

pub use config::ClientConfig;
