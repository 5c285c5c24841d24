//! Error types for the replication layer

use thiserror::Error;

/// Replication error types
#[derive(Debug, Error)]
pub enum Error {
    /// Network or store unavailable; retried on the next scheduled poll
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed payload or record; dropped and logged
    #[error("Decode error: {0}")]
    Decode(String),

    /// One step of a multi-step durable write failed; later steps were skipped
    #[error("Step `{step}` failed: {reason}")]
    PartialChain { step: &'static str, reason: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The room or session no longer accepts queue entries
    #[error("Inactive: {0}")]
    Inactive(String),

    #[error(transparent)]
    Core(syncq_core::Error),
}

impl From<syncq_core::Error> for Error {
    fn from(err: syncq_core::Error) -> Self {
        match err {
            syncq_core::Error::Decode { context } => Self::Decode(context),
            other => Self::Core(other),
        }
    }
}

impl Error {
    /// Wrap a failure as the named step of a write chain
    #[must_use]
    pub fn in_step(self, step: &'static str) -> Self {
        match self {
            Self::Timeout(_) | Self::PartialChain { .. } => self,
            other => Self::PartialChain {
                step,
                reason: other.to_string(),
            },
        }
    }
}

/// Result type for replication operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_decode_maps_to_decode() {
        let err: Error = syncq_core::Error::decode("bad record").into();
        assert!(matches!(err, Error::Decode(ref msg) if msg == "bad record"));
    }

    #[test]
    fn test_in_step_wraps_once() {
        let err = Error::Transport("offline".into()).in_step("create zone");
        assert_eq!(err.to_string(), "Step `create zone` failed: Transport error: offline");
        let again = err.in_step("save details");
        assert!(matches!(again, Error::PartialChain { step: "create zone", .. }));
    }
}
