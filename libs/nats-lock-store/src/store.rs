//! [`LockStore`] over a JetStream KV bucket.
//!
//! Each lock record is one KV key. The entry revision is the opacity token:
//! `create` maps to KV create (fails if a live value exists) and `update` to
//! KV update with the expected last revision.

use std::future::Future;
use std::time::Duration;

use async_nats::jetstream::kv;
use async_trait::async_trait;
use leader_election::record::{decode, encode};
use leader_election::{
    LeaseRecord, LockStore, OpacityToken, RecordKey, StoreError, StoreResult, Versioned,
};
use tracing::{debug, trace, warn};

use crate::client::NatsClient;
use crate::error::NatsStoreResult;

const OPEN_RETRY_MAX: u32 = 3;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Lock records stored in a NATS JetStream KV bucket.
#[derive(Clone)]
pub struct NatsLockStore {
    kv: kv::Store,
    bucket: String,
    request_timeout: Duration,
}

impl NatsLockStore {
    /// Open the configured bucket on a connected client, creating it if
    /// missing. Transient failures are retried `OPEN_RETRY_MAX` times.
    pub async fn open(client: &NatsClient) -> NatsStoreResult<Self> {
        let (bucket, history) = client.bucket().await;
        let mut attempt = 0;
        let kv = loop {
            match client.get_or_create_kv_bucket(&bucket, history).await {
                Ok(kv) => break kv,
                Err(err) if err.is_retryable() && attempt < OPEN_RETRY_MAX => {
                    attempt += 1;
                    warn!(bucket, attempt, error = %err, "failed to open lock record bucket, retrying");
                    tokio::time::sleep(OPEN_RETRY_DELAY).await;
                }
                Err(err) => return Err(err),
            }
        };
        debug!(bucket, "opened lock record bucket");
        Ok(Self {
            kv,
            bucket,
            request_timeout: client.request_timeout(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn call<T, E, F>(&self, what: &str, key: &str, op: F) -> StoreResult<T>
    where
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        tokio::time::timeout(self.request_timeout, op)
            .await
            .map_err(|_| {
                StoreError::Timeout(format!(
                    "KV {what} for key '{key}' timed out after {:?}",
                    self.request_timeout
                ))
            })?
            .map_err(|e| StoreError::Unavailable(format!("KV {what} failed for key '{key}': {e}")))
    }

    /// Current live value and revision, `None` if absent or deleted.
    async fn read(&self, kv_key: &str) -> StoreResult<Option<(LeaseRecord, u64)>> {
        let entry = self.call("read", kv_key, self.kv.entry(kv_key)).await?;
        match entry {
            Some(entry) if matches!(entry.operation, kv::Operation::Put) => {
                Ok(Some((decode(&entry.value)?, entry.revision)))
            }
            _ => Ok(None),
        }
    }
}

impl std::fmt::Debug for NatsLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsLockStore")
            .field("bucket", &self.bucket)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// KV key for a record: `<namespace>/<name>`, each part restricted to the
/// characters KV keys accept.
pub fn kv_key(key: &RecordKey) -> String {
    format!(
        "{}/{}",
        sanitize_key_component(&key.namespace),
        sanitize_key_component(&key.name)
    )
}

fn sanitize_key_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Revision carried by a token, `None` if it did not come from this store.
fn token_revision(token: &OpacityToken) -> Option<u64> {
    token.as_str().parse().ok()
}

/// A failed KV create is a lost race if a live value exists afterwards.
fn create_failure(key: &RecordKey, current: Option<u64>, err: StoreError) -> StoreError {
    match current {
        Some(_) => StoreError::AlreadyExists { key: key.clone() },
        None => err,
    }
}

/// Classify a failed KV update by the revision read back afterwards.
fn update_failure(
    key: &RecordKey,
    token: &OpacityToken,
    expected: u64,
    current: Option<u64>,
    err: StoreError,
) -> StoreError {
    match current {
        None => StoreError::NotFound { key: key.clone() },
        Some(current) if current != expected => StoreError::Conflict {
            key: key.clone(),
            token: token.to_string(),
        },
        Some(_) => err,
    }
}

#[async_trait]
impl LockStore for NatsLockStore {
    async fn get(&self, key: &RecordKey) -> StoreResult<Versioned> {
        let kv_key = kv_key(key);
        match self.read(&kv_key).await? {
            Some((record, revision)) => Ok(Versioned {
                record,
                token: OpacityToken::from(revision),
            }),
            None => Err(StoreError::NotFound { key: key.clone() }),
        }
    }

    async fn create(&self, key: &RecordKey, record: &LeaseRecord) -> StoreResult<OpacityToken> {
        let kv_key = kv_key(key);
        let payload = encode(record)?;
        match self
            .call("create", &kv_key, self.kv.create(&kv_key, payload.into()))
            .await
        {
            Ok(revision) => {
                trace!(key = %kv_key, revision, "created lock record");
                Ok(OpacityToken::from(revision))
            }
            Err(err) => {
                let current = self.read(&kv_key).await?.map(|(_, revision)| revision);
                Err(create_failure(key, current, err))
            }
        }
    }

    async fn update(
        &self,
        key: &RecordKey,
        record: &LeaseRecord,
        token: &OpacityToken,
    ) -> StoreResult<OpacityToken> {
        let kv_key = kv_key(key);
        let Some(expected) = token_revision(token) else {
            return Err(StoreError::Conflict {
                key: key.clone(),
                token: token.to_string(),
            });
        };
        let payload = encode(record)?;
        match self
            .call(
                "update",
                &kv_key,
                self.kv.update(&kv_key, payload.into(), expected),
            )
            .await
        {
            Ok(revision) => {
                trace!(key = %kv_key, revision, "updated lock record");
                Ok(OpacityToken::from(revision))
            }
            Err(err) => {
                let current = self.read(&kv_key).await?.map(|(_, revision)| revision);
                Err(update_failure(key, token, expected, current, err))
            }
        }
    }
}
