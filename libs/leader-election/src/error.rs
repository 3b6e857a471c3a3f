//! Error types for lock stores and the election engine.
//!
//! Store errors are classified so the engine can tell transient failures,
//! which it retries at the configured cadence, from ones that indicate a
//! broken backend or record.

use thiserror::Error;

use crate::store::RecordKey;

/// Failures reported by a [`LockStore`] implementation.
///
/// [`LockStore`]: crate::store::LockStore
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No record exists under the key.
    #[error("lock record {key} not found")]
    NotFound { key: RecordKey },

    /// `create` was called but a record is already present.
    #[error("lock record {key} already exists")]
    AlreadyExists { key: RecordKey },

    /// The opacity token supplied with an update no longer matches the
    /// stored record.
    #[error("lock record {key} was modified concurrently (stale token {token})")]
    Conflict { key: RecordKey, token: String },

    /// Backend could not be reached or rejected the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Backend call did not complete in time.
    #[error("store timeout: {0}")]
    Timeout(String),

    /// Stored payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl StoreError {
    /// Returns true if retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. }
                | StoreError::AlreadyExists { .. }
                | StoreError::Unavailable(_)
                | StoreError::Timeout(_)
        )
    }

    /// Returns true if the write lost an optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::AlreadyExists { .. }
        )
    }

    /// Returns true if the record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Shorthand result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced to the caller of the election engine.
///
/// Only configuration problems are fatal. Store failures during the election
/// are retried internally and never escape `run`.
#[derive(Debug, Error)]
pub enum ElectionError {
    /// Missing or invalid configuration, including unresolved identity or
    /// namespace.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Shorthand result alias for election setup.
pub type ElectionResult<T> = Result<T, ElectionError>;
