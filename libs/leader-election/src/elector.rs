//! The election engine.
//!
//! A [`LeaderElector`] runs a single control loop against one lock record:
//!
//! ```text
//! Idle -> Acquiring -> Leading <-> Renewing -> Releasing -> Idle
//! ```
//!
//! While acquiring, the record is polled every `retry_period` and claimed when
//! it is missing, vacant, expired, or already held by this identity. While
//! leading, the claim is refreshed every `retry_period`; if no refresh succeeds
//! within `renew_deadline` of the last one, the elector steps down without
//! writing again. All store calls and callbacks happen sequentially on the
//! loop.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, sleep_until, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::callbacks::LeaderCallbacks;
use crate::config::ElectionConfig;
use crate::error::{ElectionResult, StoreError, StoreResult};
use crate::metrics;
use crate::record::LeaseRecord;
use crate::store::{LockStore, OpacityToken, RecordKey, Versioned};

/// Where the control loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionPhase {
    Idle,
    Acquiring,
    Leading,
    Renewing,
    Releasing,
}

impl fmt::Display for ElectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElectionPhase::Idle => "idle",
            ElectionPhase::Acquiring => "acquiring",
            ElectionPhase::Leading => "leading",
            ElectionPhase::Renewing => "renewing",
            ElectionPhase::Releasing => "releasing",
        };
        f.write_str(s)
    }
}

/// Snapshot published on every phase or leader change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElectionStatus {
    /// This participant's identity.
    pub identity: String,
    pub phase: ElectionPhase,
    /// Last holder seen in the record, if any.
    pub leader: Option<String>,
}

impl ElectionStatus {
    /// True while this participant holds the lease.
    pub fn is_leader(&self) -> bool {
        matches!(self.phase, ElectionPhase::Leading | ElectionPhase::Renewing)
    }
}

/// Why [`LeaderElector::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// The caller cancelled the run.
    Cancelled,
    /// Leadership was lost: the renew deadline passed, or another participant
    /// was found holding the record. Nothing was written after stepping down.
    LeadershipLost,
}

/// Runs the election for one lock record.
pub struct LeaderElector<S, C> {
    config: ElectionConfig,
    key: RecordKey,
    label: String,
    store: S,
    callbacks: C,
    status: watch::Sender<ElectionStatus>,
}

/// The claim this elector currently holds.
struct Held {
    record: LeaseRecord,
    token: OpacityToken,
    /// Local time taken just before `record.renew_time` was stamped.
    stamped: Instant,
}

/// Local time at which the record was last seen to change.
struct Observed {
    token: OpacityToken,
    at: Instant,
}

#[derive(Default)]
struct RunState {
    observed: Option<Observed>,
    last_reported: Option<String>,
}

enum Attempt {
    Acquired(Held),
    Retry,
    Cancelled,
}

impl<S, C> LeaderElector<S, C>
where
    S: LockStore,
    C: LeaderCallbacks,
{
    /// Validate `config`, resolve its identity and namespace, and bind the
    /// elector to `store`. No store call is made here.
    pub fn new(config: ElectionConfig, store: S, callbacks: C) -> ElectionResult<Self> {
        let config = config.resolve()?;
        let key = config.record_key();
        let (status, _) = watch::channel(ElectionStatus {
            identity: config.election_id.clone(),
            phase: ElectionPhase::Idle,
            leader: None,
        });
        Ok(Self {
            label: key.to_string(),
            key,
            config,
            store,
            callbacks,
            status,
        })
    }

    pub fn identity(&self) -> &str {
        &self.config.election_id
    }

    /// The resolved configuration.
    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub fn record_key(&self) -> &RecordKey {
        &self.key
    }

    /// Receiver of status updates, starting with the current status.
    pub fn subscribe(&self) -> watch::Receiver<ElectionStatus> {
        self.status.subscribe()
    }

    /// Run the election until `token` is cancelled or leadership is lost.
    ///
    /// On cancellation while leading, the leader workload is stopped and the
    /// record is vacated if `release_on_cancel` is set. The elector can be run
    /// again after it returns.
    pub async fn run(&mut self, token: CancellationToken) -> ElectionOutcome {
        info!(
            identity = %self.config.election_id,
            election = %self.key,
            lease_duration = ?self.config.lease_duration,
            renew_deadline = ?self.config.renew_deadline,
            retry_period = ?self.config.retry_period,
            "starting leader election"
        );
        let mut state = RunState::default();
        let outcome = match self.acquire(&token, &mut state).await {
            Some(held) if token.is_cancelled() => {
                info!(election = %self.key, "cancelled right after acquiring, not leading");
                metrics::LEADER.with_label_values(&[self.label.as_str()]).set(0);
                if self.config.release_on_cancel {
                    self.set_phase(ElectionPhase::Releasing);
                    self.release(&held).await;
                }
                ElectionOutcome::Cancelled
            }
            Some(held) => self.lead(&token, &mut state, held).await,
            None => {
                info!(election = %self.key, "leader election cancelled while acquiring");
                ElectionOutcome::Cancelled
            }
        };
        self.set_phase(ElectionPhase::Idle);
        outcome
    }

    // --- acquiring ---

    async fn acquire(&self, token: &CancellationToken, state: &mut RunState) -> Option<Held> {
        self.set_phase(ElectionPhase::Acquiring);
        loop {
            if token.is_cancelled() {
                return None;
            }
            match self.try_acquire(token, state).await {
                Attempt::Acquired(held) => {
                    info!(
                        identity = %self.config.election_id,
                        election = %self.key,
                        transitions = held.record.leader_transitions,
                        "acquired lease"
                    );
                    metrics::ACQUISITIONS.with_label_values(&[self.label.as_str()]).inc();
                    metrics::LEADER.with_label_values(&[self.label.as_str()]).set(1);
                    state.last_reported = Some(self.config.election_id.clone());
                    self.set_leader(Some(self.config.election_id.clone()));
                    return Some(held);
                }
                Attempt::Cancelled => return None,
                Attempt::Retry => {}
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                _ = sleep(self.config.retry_period) => {}
            }
        }
    }

    async fn try_acquire(&self, token: &CancellationToken, state: &mut RunState) -> Attempt {
        let deadline = Instant::now() + self.config.renew_deadline;
        let id = self.config.election_id.as_str();

        let current = match self.bounded(token, deadline, self.store.get(&self.key)).await {
            None => return Attempt::Cancelled,
            Some(Ok(current)) => Some(current),
            Some(Err(err)) if err.is_not_found() => None,
            Some(Err(err)) => {
                debug!(?err, election = %self.key, "failed to read lock record, will retry");
                return Attempt::Retry;
            }
        };

        let stamped = Instant::now();
        let now = Utc::now();
        let (record, result) = match current {
            None => {
                let record = LeaseRecord::claimed(id, self.config.lease_duration, now);
                let result = self
                    .bounded(token, deadline, self.store.create(&self.key, &record))
                    .await;
                (record, result)
            }
            Some(current) => {
                self.observe(state, &current);
                let claimable = current.record.is_vacant()
                    || current.record.is_held_by(id)
                    || self.is_expired(state, &current.record);
                if !claimable {
                    trace!(holder = %current.record.holder_identity, "lease is held by another participant");
                    return Attempt::Retry;
                }
                let record = current
                    .record
                    .taken_over_by(id, self.config.lease_duration, now);
                let result = self
                    .bounded(
                        token,
                        deadline,
                        self.store.update(&self.key, &record, &current.token),
                    )
                    .await;
                (record, result)
            }
        };

        match result {
            None => Attempt::Cancelled,
            Some(Ok(token)) => Attempt::Acquired(Held {
                record,
                token,
                stamped,
            }),
            Some(Err(err)) => {
                debug!(?err, election = %self.key, "failed to claim lease, will retry");
                Attempt::Retry
            }
        }
    }

    /// Track record changes on the local clock and report new holders.
    fn observe(&self, state: &mut RunState, current: &Versioned) {
        let changed = state
            .observed
            .as_ref()
            .is_none_or(|observed| observed.token != current.token);
        if changed {
            state.observed = Some(Observed {
                token: current.token.clone(),
                at: Instant::now(),
            });
        }

        let holder = &current.record.holder_identity;
        if current.record.is_vacant() {
            self.set_leader(None);
        } else if holder != &self.config.election_id {
            self.set_leader(Some(holder.clone()));
            self.report_leader(state, holder);
        }
    }

    fn report_leader(&self, state: &mut RunState, holder: &str) {
        if holder.is_empty()
            || holder == self.config.election_id
            || state.last_reported.as_deref() == Some(holder)
        {
            return;
        }
        info!(leader = %holder, election = %self.key, "new leader observed");
        metrics::LEADER_CHANGES_OBSERVED
            .with_label_values(&[self.label.as_str()])
            .inc();
        state.last_reported = Some(holder.to_owned());
        self.callbacks.on_new_leader(holder);
    }

    /// Expired by the record's own timestamps, or unchanged on the local
    /// clock for longer than the recorded lease duration.
    fn is_expired(&self, state: &RunState, record: &LeaseRecord) -> bool {
        if record.is_expired(Utc::now()) {
            return true;
        }
        let lease = Duration::from_secs(record.lease_duration_seconds);
        state
            .observed
            .as_ref()
            .is_some_and(|observed| observed.at.elapsed() > lease)
    }

    // --- leading ---

    async fn lead(
        &self,
        token: &CancellationToken,
        state: &mut RunState,
        mut held: Held,
    ) -> ElectionOutcome {
        self.set_phase(ElectionPhase::Leading);
        let work_token = token.child_token();
        let workload = tokio::spawn(self.callbacks.on_started_leading(work_token.clone()));

        let (outcome, successor) = self.renew(token, &mut held).await;

        self.set_phase(ElectionPhase::Releasing);
        work_token.cancel();
        if let Err(err) = workload.await {
            if err.is_panic() {
                error!(?err, election = %self.key, "leader workload panicked");
            }
        }
        metrics::LEADER.with_label_values(&[self.label.as_str()]).set(0);
        self.callbacks.on_stopped_leading();

        match outcome {
            ElectionOutcome::Cancelled => {
                info!(election = %self.key, "stopped leading: cancelled");
                if self.config.release_on_cancel {
                    self.release(&held).await;
                }
            }
            ElectionOutcome::LeadershipLost => {
                metrics::ABDICATIONS.with_label_values(&[self.label.as_str()]).inc();
                warn!(election = %self.key, "stopped leading: leadership lost");
                self.set_leader(successor.clone());
                if let Some(successor) = successor {
                    self.report_leader(state, &successor);
                }
            }
        }
        outcome
    }

    /// Refresh the claim until cancelled or the renew deadline passes.
    /// The deadline counts from the start of the last successful write.
    /// Returns the new holder when one was observed while stepping down.
    async fn renew(
        &self,
        token: &CancellationToken,
        held: &mut Held,
    ) -> (ElectionOutcome, Option<String>) {
        let mut last_success = held.stamped;
        loop {
            let deadline = last_success + self.config.renew_deadline;
            let next = (Instant::now() + self.config.retry_period).min(deadline);
            tokio::select! {
                biased;
                _ = token.cancelled() => return (ElectionOutcome::Cancelled, None),
                _ = sleep_until(next) => {}
            }
            if Instant::now() >= deadline {
                warn!(
                    election = %self.key,
                    renew_deadline = ?self.config.renew_deadline,
                    "failed to renew lease before the renew deadline"
                );
                return (ElectionOutcome::LeadershipLost, None);
            }

            self.set_phase(ElectionPhase::Renewing);
            let attempt_started = Instant::now();
            let record = held
                .record
                .renewed(self.config.lease_duration, Utc::now());
            let result = self
                .bounded(
                    token,
                    deadline,
                    self.store.update(&self.key, &record, &held.token),
                )
                .await;
            let Some(result) = result else {
                return (ElectionOutcome::Cancelled, None);
            };

            let err = match result {
                Ok(new_token) => {
                    trace!(election = %self.key, token = %new_token, "renewed lease");
                    *held = Held {
                        record,
                        token: new_token,
                        stamped: attempt_started,
                    };
                    last_success = attempt_started;
                    self.set_phase(ElectionPhase::Leading);
                    continue;
                }
                Err(err) => err,
            };
            metrics::RENEW_FAILURES
                .with_label_values(&[self.label.as_str()])
                .inc();
            if !err.is_conflict() {
                debug!(?err, election = %self.key, "lease renewal failed, will retry");
                continue;
            }

            // stale token: find out whether we still hold the record
            match self
                .bounded(token, deadline, self.store.get(&self.key))
                .await
            {
                None => return (ElectionOutcome::Cancelled, None),
                Some(Ok(current)) if current.record.is_held_by(&self.config.election_id) => {
                    debug!(election = %self.key, "lease token was stale, refreshed");
                    *held = Held {
                        record: current.record,
                        token: current.token,
                        stamped: held.stamped,
                    };
                }
                Some(Ok(current)) => {
                    warn!(
                        election = %self.key,
                        holder = %current.record.holder_identity,
                        "lease is no longer held by this participant"
                    );
                    let successor = (!current.record.is_vacant())
                        .then_some(current.record.holder_identity);
                    return (ElectionOutcome::LeadershipLost, successor);
                }
                Some(Err(err)) => {
                    debug!(?err, election = %self.key, "failed to re-read lock record after conflict");
                }
            }
        }
    }

    /// Best-effort vacancy write after cancellation.
    async fn release(&self, held: &Held) {
        let record = held.record.released(Utc::now());
        let result = timeout(
            self.config.renew_deadline,
            self.store.update(&self.key, &record, &held.token),
        )
        .await;
        match result {
            Ok(Ok(_)) => {
                info!(election = %self.key, "released lease");
                self.set_leader(None);
            }
            Ok(Err(err)) => {
                metrics::RELEASE_FAILURES
                    .with_label_values(&[self.label.as_str()])
                    .inc();
                warn!(?err, election = %self.key, "failed to release lease");
            }
            Err(_) => {
                metrics::RELEASE_FAILURES
                    .with_label_values(&[self.label.as_str()])
                    .inc();
                warn!(election = %self.key, "timed out releasing lease");
            }
        }
    }

    // --- helpers ---

    /// Run a store call until it finishes, `deadline` passes, or `token` is
    /// cancelled. `None` means cancelled.
    async fn bounded<T, F>(
        &self,
        token: &CancellationToken,
        deadline: Instant,
        op: F,
    ) -> Option<StoreResult<T>>
    where
        F: Future<Output = StoreResult<T>>,
    {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            res = timeout_at(deadline, op) => Some(res.unwrap_or_else(|_| {
                Err(StoreError::Timeout(format!("no response for {}", self.key)))
            })),
        }
    }

    fn set_phase(&self, phase: ElectionPhase) {
        self.status.send_if_modified(|status| {
            if status.phase == phase {
                return false;
            }
            debug!(election = %self.key, from = %status.phase, to = %phase, "phase change");
            status.phase = phase;
            true
        });
    }

    fn set_leader(&self, leader: Option<String>) {
        self.status.send_if_modified(|status| {
            if status.leader == leader {
                return false;
            }
            status.leader = leader;
            true
        });
    }
}
