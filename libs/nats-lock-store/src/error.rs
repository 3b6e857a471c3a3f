//! Error types for the NATS lock store connection layer.

use leader_election::StoreError;
use thiserror::Error;

/// Failures while configuring or talking to NATS, outside the per-record
/// [`LockStore`](leader_election::LockStore) calls.
#[derive(Debug, Error)]
pub enum NatsStoreError {
    /// NATS connection or transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation timed out waiting for a response.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Configuration error (e.g. missing required fields).
    #[error("configuration error: {0}")]
    Config(String),

    /// The client is not connected or connection was lost.
    #[error("not connected: {0}")]
    NotConnected(String),
}

impl NatsStoreError {
    /// Returns true if this error indicates a transient failure that may
    /// succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NatsStoreError::Transport(_)
                | NatsStoreError::Timeout(_)
                | NatsStoreError::NotConnected(_)
        )
    }
}

impl From<NatsStoreError> for StoreError {
    fn from(err: NatsStoreError) -> Self {
        match err {
            NatsStoreError::Timeout(msg) => StoreError::Timeout(msg),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Shorthand result alias for NATS store setup.
pub type NatsStoreResult<T> = Result<T, NatsStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(NatsStoreError::Transport("reset".into()).is_retryable());
        assert!(NatsStoreError::NotConnected("down".into()).is_retryable());
        assert!(NatsStoreError::Timeout("slow".into()).is_retryable());
        assert!(!NatsStoreError::Config("no servers".into()).is_retryable());
    }

    #[test]
    fn test_into_store_error() {
        let err: StoreError = NatsStoreError::Timeout("kv get".into()).into();
        assert_eq!(err, StoreError::Timeout("kv get".into()));

        let err: StoreError = NatsStoreError::NotConnected("down".into()).into();
        assert!(matches!(err, StoreError::Unavailable(msg) if msg.contains("not connected")));
    }
}
