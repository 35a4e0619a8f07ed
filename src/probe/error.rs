use std::time::Duration;
use thiserror::Error;

/// Failures a probe can hit while driving its wire exchange.
///
/// A `ProbeError` is never a negative identification: the dispatcher logs it
/// and moves on to the next candidate.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// A probe hit a state it cannot recover from (contained panic included).
    #[error("probe internal error: {0}")]
    Internal(String),
}

impl ProbeError {
    /// A reset before the first read means the peer refused the probe, which
    /// is a miss rather than a failure worth surfacing.
    pub fn is_peer_refusal(&self) -> bool {
        matches!(
            self,
            ProbeError::Io(e) if e.kind() == std::io::ErrorKind::ConnectionReset
        )
    }
}
