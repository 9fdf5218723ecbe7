//! Error types for catsync-engine
//!
//! Severity follows the run boundary:
//! - `TransportError`: one remote call; retried inside the transport
//! - `ReconcileError::TrackOperationFailed`: one track; recorded and skipped
//! - `ReconcileError::UpstreamUnavailable`: the catalog view; fatal for the run

use std::time::Duration;
use thiserror::Error;

/// Failure of a single remote catalog call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Explicit rate-limit signal, optionally with a retry-after hint
    #[error("Throttled by remote catalog (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    /// Network failure, timeout, or 5xx
    #[error("Remote catalog unavailable: {0}")]
    Unavailable(String),

    /// Malformed or unexpected response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request refused by the remote side (4xx) or impossible to build; never retried
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether the transport may retry after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }

    /// Server-provided retry hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short machine-readable code for logs and summaries
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Throttled { .. } => "THROTTLED",
            TransportError::Unavailable(_) => "UNAVAILABLE",
            TransportError::Protocol(_) => "PROTOCOL_ERROR",
            TransportError::Rejected(_) => "REJECTED",
        }
    }
}

/// Decision log sink failure
#[derive(Debug, Error)]
pub enum DecisionLogError {
    #[error("Decision log IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decision log serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Reconciliation errors
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Catalog listing failed after retries; no reconciliation is possible
    #[error("Upstream catalog unavailable: {0}")]
    UpstreamUnavailable(#[source] TransportError),

    /// Upload or metadata patch for one track exhausted retries
    #[error("Operation failed for track {track_id}: {source}")]
    TrackOperationFailed {
        track_id: String,
        #[source]
        source: TransportError,
    },
}

/// Result type for reconciliation operations
pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rejected_is_terminal() {
        assert!(TransportError::Throttled { retry_after: None }.is_retryable());
        assert!(TransportError::Unavailable("timeout".into()).is_retryable());
        assert!(TransportError::Protocol("bad json".into()).is_retryable());
        assert!(!TransportError::Rejected("404".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_only_on_throttled() {
        let hint = Duration::from_secs(7);
        assert_eq!(TransportError::Throttled { retry_after: Some(hint) }.retry_after(), Some(hint));
        assert_eq!(TransportError::Unavailable("x".into()).retry_after(), None);
    }

    #[test]
    fn test_track_failure_message_names_track() {
        let err = ReconcileError::TrackOperationFailed {
            track_id: "t-42".to_string(),
            source: TransportError::Unavailable("connection reset".to_string()),
        };
        assert!(err.to_string().contains("t-42"));
        assert!(err.to_string().contains("connection reset"));
    }
}
