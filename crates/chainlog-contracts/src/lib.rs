//! # chainlog-contracts
//!
//! Shared types for the chainlog attestation client: records, the messages
//! exchanged with an append-only log service, verification findings and the
//! error taxonomy.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions and error types.

pub mod capability;
pub mod error;
pub mod log;
pub mod record;
pub mod verify;
