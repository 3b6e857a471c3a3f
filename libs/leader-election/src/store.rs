//! The compare-and-swap lock record primitive the election is built on.
//!
//! Any backend that can atomically read, create-if-absent, and
//! update-if-unchanged a single named record can implement [`LockStore`]:
//! a KV bucket with revisions, a SQL row with a version column, and so on.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::record::LeaseRecord;

/// Address of a lock record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub namespace: String,
    pub name: String,
}

impl RecordKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Optimistic-concurrency marker handed out on every read and write.
///
/// Opaque to the engine: it is only ever compared for equality and passed
/// back to the store that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpacityToken(String);

impl OpacityToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for OpacityToken {
    fn from(revision: u64) -> Self {
        Self(revision.to_string())
    }
}

impl fmt::Display for OpacityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record together with the token that must accompany its next update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub record: LeaseRecord,
    pub token: OpacityToken,
}

/// Atomic read / create / conditional-update on a named lease record.
///
/// The three operations must be atomic with respect to each other as seen by
/// every participant using the same backend.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Read the record. Fails with [`StoreError::NotFound`] if absent.
    ///
    /// [`StoreError::NotFound`]: crate::error::StoreError::NotFound
    async fn get(&self, key: &RecordKey) -> StoreResult<Versioned>;

    /// Persist `record` only if nothing is stored under `key`. Fails with
    /// [`StoreError::AlreadyExists`] otherwise.
    ///
    /// [`StoreError::AlreadyExists`]: crate::error::StoreError::AlreadyExists
    async fn create(&self, key: &RecordKey, record: &LeaseRecord) -> StoreResult<OpacityToken>;

    /// Replace the record only if `token` still matches the stored one. A
    /// stale token fails with [`StoreError::Conflict`] and leaves the record
    /// untouched.
    ///
    /// [`StoreError::Conflict`]: crate::error::StoreError::Conflict
    async fn update(
        &self,
        key: &RecordKey,
        record: &LeaseRecord,
        token: &OpacityToken,
    ) -> StoreResult<OpacityToken>;
}

#[async_trait]
impl<S> LockStore for Arc<S>
where
    S: LockStore + ?Sized,
{
    async fn get(&self, key: &RecordKey) -> StoreResult<Versioned> {
        (**self).get(key).await
    }

    async fn create(&self, key: &RecordKey, record: &LeaseRecord) -> StoreResult<OpacityToken> {
        (**self).create(key, record).await
    }

    async fn update(
        &self,
        key: &RecordKey,
        record: &LeaseRecord,
        token: &OpacityToken,
    ) -> StoreResult<OpacityToken> {
        (**self).update(key, record, token).await
    }
}
