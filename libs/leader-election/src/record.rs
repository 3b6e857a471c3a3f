//! The lease record stored in the lock store, and its JSON codec.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Current claim on a lock record.
///
/// An empty `holder_identity` means the lease is vacant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Identity of the participant that believes it holds the lease.
    #[serde(default)]
    pub holder_identity: String,
    /// How long, in whole seconds, the claim stays valid after `renew_time`.
    pub lease_duration_seconds: u64,
    /// When the current holder first acquired the lease.
    pub acquire_time: DateTime<Utc>,
    /// When the current holder last refreshed the lease.
    pub renew_time: DateTime<Utc>,
    /// Number of times the holder changed to a new non-empty identity.
    #[serde(default)]
    pub leader_transitions: u64,
}

impl LeaseRecord {
    /// A fresh record claimed by `identity` at `now`.
    pub fn claimed(identity: &str, lease_duration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            holder_identity: identity.to_owned(),
            lease_duration_seconds: duration_to_seconds(lease_duration),
            acquire_time: now,
            renew_time: now,
            leader_transitions: 0,
        }
    }

    pub fn is_vacant(&self) -> bool {
        self.holder_identity.is_empty()
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        !self.is_vacant() && self.holder_identity == identity
    }

    /// Wall-clock instant after which the claim lapses.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let secs = i64::try_from(self.lease_duration_seconds).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(secs)
            .and_then(|lease| self.renew_time.checked_add_signed(lease))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True once `now - renew_time` exceeds the recorded lease duration.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// The record written when `identity` takes the lease over from whatever
    /// this record currently describes.
    ///
    /// Resuming one's own claim keeps `acquire_time` and the transition
    /// counter; taking it from someone else (or from vacancy) restarts
    /// `acquire_time` and counts a transition.
    pub fn taken_over_by(
        &self,
        identity: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let resuming = self.holder_identity == identity;
        Self {
            holder_identity: identity.to_owned(),
            lease_duration_seconds: duration_to_seconds(lease_duration),
            acquire_time: if resuming { self.acquire_time } else { now },
            renew_time: now,
            leader_transitions: if resuming {
                self.leader_transitions
            } else {
                self.leader_transitions.saturating_add(1)
            },
        }
    }

    /// The same claim with `renew_time` moved to `now`.
    pub fn renewed(&self, lease_duration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            lease_duration_seconds: duration_to_seconds(lease_duration),
            renew_time: now,
            ..self.clone()
        }
    }

    /// A vacated record so that a successor can claim it without waiting for
    /// expiry. The transition counter is kept.
    pub fn released(&self, now: DateTime<Utc>) -> Self {
        Self {
            holder_identity: String::new(),
            lease_duration_seconds: 1,
            acquire_time: now,
            renew_time: now,
            leader_transitions: self.leader_transitions,
        }
    }
}

/// Whole seconds, rounded up so a sub-second lease never records zero.
pub(crate) fn duration_to_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// Serialize a record for storage.
pub fn encode(record: &LeaseRecord) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| StoreError::Codec(format!("encode failed: {e}")))
}

/// Deserialize a record read from storage.
pub fn decode(bytes: &[u8]) -> StoreResult<LeaseRecord> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Codec(format!("decode failed: {e}")))
}
