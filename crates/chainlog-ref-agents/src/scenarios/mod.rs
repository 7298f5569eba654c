//! Reference attestation scenarios.
//!
//! Each scenario is a self-contained module that wires the real chainlog
//! components (record builder, schema validator, client, verifier) to an
//! `InMemoryLogService` and demonstrates one behavior of the log client.

pub mod agent_session;
pub mod ambiguous_submission;
pub mod model_deployment;
pub mod payment_trail;
pub mod tamper_detection;
