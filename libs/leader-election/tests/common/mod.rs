#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use leader_election::{
    ElectionConfig, ElectionOutcome, ElectionStatus, LeaderCallbacks, LeaderElector, LeaseRecord,
    LockStore, MemoryLockStore, OpacityToken, RecordKey, StoreError, StoreResult, Versioned,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const LEASE: Duration = Duration::from_secs(15);
pub const RENEW: Duration = Duration::from_secs(10);
pub const RETRY: Duration = Duration::from_secs(2);

pub fn key() -> RecordKey {
    RecordKey::new("default", "scheduler")
}

pub fn config(id: &str) -> ElectionConfig {
    ElectionConfig::new("scheduler")
        .with_namespace("default")
        .with_identity(id)
        .with_timings(LEASE, RENEW, RETRY)
}

/// One participant's view of a shared [`MemoryLockStore`], with its own write
/// counter and an update fault switch.
#[derive(Clone, Default)]
pub struct TestStore {
    pub inner: MemoryLockStore,
    pub writes: Arc<AtomicUsize>,
    pub fail_updates: Arc<AtomicBool>,
}

impl TestStore {
    pub fn sharing(inner: &MemoryLockStore) -> Self {
        Self {
            inner: inner.clone(),
            ..Self::default()
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LockStore for TestStore {
    async fn get(&self, key: &RecordKey) -> StoreResult<Versioned> {
        self.inner.get(key).await
    }

    async fn create(&self, key: &RecordKey, record: &LeaseRecord) -> StoreResult<OpacityToken> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.create(key, record).await
    }

    async fn update(
        &self,
        key: &RecordKey,
        record: &LeaseRecord,
        token: &OpacityToken,
    ) -> StoreResult<OpacityToken> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Conflict {
                key: key.clone(),
                token: token.to_string(),
            });
        }
        self.inner.update(key, record, token).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Stopped(String),
    NewLeader { observer: String, leader: String },
}

/// Callback log shared by every participant in a test. Panics if two
/// participants are ever leading at once.
#[derive(Clone, Default)]
pub struct Tracker {
    leader: Arc<Mutex<Option<String>>>,
    events: Arc<Mutex<Vec<(Instant, Event)>>>,
}

impl Tracker {
    pub fn participant(&self, id: &str) -> Participant {
        Participant {
            id: id.to_owned(),
            tracker: self.clone(),
        }
    }

    pub fn leader(&self) -> Option<String> {
        self.leader.lock().clone()
    }

    /// Forget the leader without a stop event, as if its process died.
    pub fn kill(&self, id: &str) {
        let mut leader = self.leader.lock();
        assert_eq!(leader.as_deref(), Some(id));
        *leader = None;
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.lock().iter().filter(|(_, e)| e == event).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().push((Instant::now(), event));
    }
}

pub struct Participant {
    id: String,
    tracker: Tracker,
}

impl LeaderCallbacks for Participant {
    fn on_started_leading(&self, token: CancellationToken) -> BoxFuture<'static, ()> {
        {
            let mut leader = self.tracker.leader.lock();
            assert!(
                leader.is_none(),
                "{} started leading while {:?} leads",
                self.id,
                leader
            );
            *leader = Some(self.id.clone());
        }
        self.tracker.push(Event::Started(self.id.clone()));
        async move { token.cancelled().await }.boxed()
    }

    fn on_stopped_leading(&self) {
        {
            let mut leader = self.tracker.leader.lock();
            assert_eq!(leader.as_deref(), Some(self.id.as_str()));
            *leader = None;
        }
        self.tracker.push(Event::Stopped(self.id.clone()));
    }

    fn on_new_leader(&self, identity: &str) {
        self.tracker.push(Event::NewLeader {
            observer: self.id.clone(),
            leader: identity.to_owned(),
        });
    }
}

pub struct Running {
    pub token: CancellationToken,
    pub status: watch::Receiver<ElectionStatus>,
    pub handle: JoinHandle<ElectionOutcome>,
}

impl Running {
    pub async fn wait_leading(&mut self, within: Duration) {
        tokio::time::timeout(within, self.status.wait_for(|s| s.is_leader()))
            .await
            .expect("did not become leader in time")
            .unwrap();
    }

    pub fn is_leader(&self) -> bool {
        self.status.borrow().is_leader()
    }

    pub async fn stop(self) -> ElectionOutcome {
        self.token.cancel();
        self.handle.await.unwrap()
    }
}

pub fn spawn(id: &str, store: TestStore, tracker: &Tracker) -> Running {
    spawn_with(config(id), store, tracker)
}

pub fn spawn_with(config: ElectionConfig, store: TestStore, tracker: &Tracker) -> Running {
    let callbacks = tracker.participant(&config.election_id);
    let mut elector = LeaderElector::new(config, store, callbacks).unwrap();
    let status = elector.subscribe();
    let token = CancellationToken::new();
    let handle = tokio::spawn({
        let token = token.clone();
        async move { elector.run(token).await }
    });
    Running {
        token,
        status,
        handle,
    }
}

pub async fn stored(store: &MemoryLockStore) -> LeaseRecord {
    store.get(&key()).await.unwrap().record
}
