//! Process-local [`LockStore`] backed by a map.
//!
//! Clones share the same records, so several electors in one process can
//! contend for a record the way separate processes would through a real
//! backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::record::LeaseRecord;
use crate::store::{LockStore, OpacityToken, RecordKey, Versioned};

#[derive(Debug, Clone, Default)]
pub struct MemoryLockStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: HashMap<RecordKey, MemoryEntry>,
    // store-wide so a recreated key never reuses an old token
    last_revision: u64,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    record: LeaseRecord,
    revision: u64,
}

impl MemoryInner {
    fn next_revision(&mut self) -> u64 {
        self.last_revision += 1;
        self.last_revision
    }
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn get(&self, key: &RecordKey) -> StoreResult<Versioned> {
        let guard = self.inner.lock();
        guard
            .records
            .get(key)
            .map(|entry| Versioned {
                record: entry.record.clone(),
                token: OpacityToken::from(entry.revision),
            })
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })
    }

    async fn create(&self, key: &RecordKey, record: &LeaseRecord) -> StoreResult<OpacityToken> {
        let mut guard = self.inner.lock();
        if guard.records.contains_key(key) {
            return Err(StoreError::AlreadyExists { key: key.clone() });
        }
        let revision = guard.next_revision();
        guard.records.insert(
            key.clone(),
            MemoryEntry {
                record: record.clone(),
                revision,
            },
        );
        trace!(%key, revision, "memory store: created record");
        Ok(OpacityToken::from(revision))
    }

    async fn update(
        &self,
        key: &RecordKey,
        record: &LeaseRecord,
        token: &OpacityToken,
    ) -> StoreResult<OpacityToken> {
        let mut guard = self.inner.lock();
        let current = guard
            .records
            .get(key)
            .map(|entry| entry.revision)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        if OpacityToken::from(current) != *token {
            return Err(StoreError::Conflict {
                key: key.clone(),
                token: token.to_string(),
            });
        }
        let revision = guard.next_revision();
        guard.records.insert(
            key.clone(),
            MemoryEntry {
                record: record.clone(),
                revision,
            },
        );
        trace!(%key, revision, "memory store: updated record");
        Ok(OpacityToken::from(revision))
    }
}
