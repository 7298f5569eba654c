//! Client configuration, loaded from TOML.
//!
//! Every section and field has a default, so an empty document is a valid
//! configuration. Example:
//!
//! ```toml
//! [retry]
//! max_attempts = 5
//! initial_backoff_ms = 100
//!
//! [chunking]
//! max_message_bytes = 1024
//! max_chunks = 20
//! oversize = "chunk"
//!
//! [fetch]
//! page_limit = 100
//! poll_interval_ms = 250
//!
//! [deadlines]
//! submit_ms = 10000
//! fetch_ms = 30000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chainlog_contracts::{
    error::{ChainlogError, ChainlogResult},
    log::MAX_PAGE_LIMIT,
};

/// Smallest `max_message_bytes` accepted; leaves room for chunk framing.
pub const MIN_MESSAGE_BYTES: usize = 64;

/// What the submitter does with a record larger than one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OversizePolicy {
    /// Split into a chunk group and reassemble on fetch.
    #[default]
    Chunk,
    /// Fail with `PayloadTooLarge`.
    Reject,
}

/// Bounded exponential backoff for transient service failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per service call, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1 for the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32) as i32;
        let millis = (self.initial_backoff_ms as f64) * self.multiplier.powi(exp);
        let capped = millis.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Largest single message the log service accepts.
    pub max_message_bytes: usize,
    /// Most chunks one record may be split into.
    pub max_chunks: u16,
    pub oversize: OversizePolicy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 1024,
            max_chunks: 20,
            oversize: OversizePolicy::Chunk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Default page size, 1 to 100.
    pub page_limit: usize,
    /// How often to re-poll for chunks that have not arrived yet.
    pub poll_interval_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_limit: MAX_PAGE_LIMIT,
            poll_interval_ms: 250,
        }
    }
}

impl FetchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Deadlines applied when the caller does not pass one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlineConfig {
    pub submit_ms: u64,
    pub fetch_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            submit_ms: 10_000,
            fetch_ms: 30_000,
        }
    }
}

impl DeadlineConfig {
    pub fn submit(&self) -> Duration {
        Duration::from_millis(self.submit_ms)
    }

    pub fn fetch(&self) -> Duration {
        Duration::from_millis(self.fetch_ms)
    }
}

/// The full client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub retry: RetryConfig,
    pub chunking: ChunkingConfig,
    pub fetch: FetchConfig,
    pub deadlines: DeadlineConfig,
}

impl ClientConfig {
    /// Parse `s` as TOML and validate the result.
    ///
    /// Returns `ChainlogError::Config` if the TOML is malformed, does not
    /// match the expected layout, or holds out-of-range values.
    pub fn from_toml_str(s: &str) -> ChainlogResult<Self> {
        let config: ClientConfig = toml::from_str(s).map_err(|e| ChainlogError::Config {
            reason: format!("failed to parse client config TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it as TOML client configuration.
    pub fn from_file(path: &Path) -> ChainlogResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ChainlogError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check value ranges the type system cannot express.
    pub fn validate(&self) -> ChainlogResult<()> {
        let fail = |reason: String| Err(ChainlogError::Config { reason });

        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1".to_string());
        }
        if !(self.retry.multiplier >= 1.0) {
            return fail(format!(
                "retry.multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            ));
        }
        if self.chunking.max_message_bytes < MIN_MESSAGE_BYTES {
            return fail(format!(
                "chunking.max_message_bytes must be at least {}, got {}",
                MIN_MESSAGE_BYTES, self.chunking.max_message_bytes
            ));
        }
        if self.chunking.max_chunks == 0 {
            return fail("chunking.max_chunks must be at least 1".to_string());
        }
        if self.fetch.page_limit == 0 || self.fetch.page_limit > MAX_PAGE_LIMIT {
            return fail(format!(
                "fetch.page_limit must be between 1 and {}, got {}",
                MAX_PAGE_LIMIT, self.fetch.page_limit
            ));
        }
        Ok(())
    }
}
