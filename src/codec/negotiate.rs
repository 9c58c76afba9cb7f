//! Protocol negotiation policy and the negative-result cache backing
//! opportunistic H2C upgrade attempts (spec §4.E).

use std::collections::HashSet;
use std::sync::Mutex;

/// Which protocol strategy a channel uses against its remotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolPreference {
    /// Plain HTTP/1.1; never attempt H2C.
    Http1Only,
    /// Attempt H2C by prior knowledge; a remote that doesn't speak it is
    /// retried over HTTP/1.1 silently and remembered in the
    /// [`NegotiationCache`] so later connections skip straight to H1.
    H2cUpgrade,
    /// Require H2C. A remote that doesn't speak it surfaces
    /// [`crate::error::PipelineError`] with kind
    /// [`crate::error::ErrorKind::ProtocolNegotiation`] instead of falling
    /// back.
    H2cPriorKnowledge,
}

/// Remembers which remotes are known not to speak H2C, keyed by authority
/// (`host:port`), so repeat connections against them skip straight to
/// HTTP/1.1 instead of re-probing every time (spec §4.E:
/// "(remote, H2C) = unsupported").
#[derive(Debug, Default)]
pub struct NegotiationCache {
    unsupported: Mutex<HashSet<String>>,
}

impl NegotiationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_h2c_unsupported(&self, authority: &str) -> bool {
        self.unsupported.lock().unwrap().contains(authority)
    }

    pub fn mark_h2c_unsupported(&self, authority: &str) {
        self.unsupported.lock().unwrap().insert(authority.to_string());
    }
}
