//! Capability tokens for log administration and submission.
//!
//! A log may be created with a submit capability; from then on only handles
//! presenting that capability can append to it. The token is opaque to the
//! client: what it proves is up to the log backend.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque capability token, e.g. a key id or a bearer credential.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability(pub String);

impl Capability {
    /// Construct a capability from any string-like value.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

// Tokens may be credentials: keep them out of logs and panic messages.
impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Capability(<redacted>)")
    }
}
