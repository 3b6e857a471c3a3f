//! Observer contract the election engine drives.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// Hooks invoked from the election control loop.
///
/// All methods run on the loop itself and must not block. Long-running
/// leader work belongs in the future returned from
/// [`on_started_leading`](LeaderCallbacks::on_started_leading).
pub trait LeaderCallbacks: Send + Sync + 'static {
    /// Called once per entry into leadership. The returned future is the
    /// leader workload; the engine spawns it and, when leadership ends,
    /// cancels `token` and waits for the future to finish before calling
    /// [`on_stopped_leading`](LeaderCallbacks::on_stopped_leading).
    fn on_started_leading(&self, token: CancellationToken) -> BoxFuture<'static, ()>;

    /// Called once when leadership ends, after the workload has returned.
    fn on_stopped_leading(&self);

    /// Called whenever a different participant is observed holding the lease.
    fn on_new_leader(&self, _identity: &str) {}
}

impl<C> LeaderCallbacks for Arc<C>
where
    C: LeaderCallbacks + ?Sized,
{
    fn on_started_leading(&self, token: CancellationToken) -> BoxFuture<'static, ()> {
        (**self).on_started_leading(token)
    }

    fn on_stopped_leading(&self) {
        (**self).on_stopped_leading()
    }

    fn on_new_leader(&self, identity: &str) {
        (**self).on_new_leader(identity)
    }
}

type StartedFn = dyn Fn(CancellationToken) -> BoxFuture<'static, ()> + Send + Sync;
type StoppedFn = dyn Fn() + Send + Sync;
type NewLeaderFn = dyn Fn(&str) + Send + Sync;

/// [`LeaderCallbacks`] assembled from closures.
///
/// ```
/// use futures::FutureExt;
/// use leader_election::Callbacks;
///
/// let callbacks = Callbacks::new(|token| {
///     async move { token.cancelled().await }.boxed()
/// })
/// .on_stopped_leading(|| println!("stepped down"))
/// .on_new_leader(|id| println!("{id} is leading"));
/// # drop(callbacks);
/// ```
#[derive(Clone)]
pub struct Callbacks {
    started: Arc<StartedFn>,
    stopped: Option<Arc<StoppedFn>>,
    new_leader: Option<Arc<NewLeaderFn>>,
}

impl Callbacks {
    pub fn new<F>(on_started_leading: F) -> Self
    where
        F: Fn(CancellationToken) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            started: Arc::new(on_started_leading),
            stopped: None,
            new_leader: None,
        }
    }

    pub fn on_stopped_leading<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.stopped = Some(Arc::new(f));
        self
    }

    pub fn on_new_leader<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.new_leader = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_stopped_leading", &self.stopped.is_some())
            .field("on_new_leader", &self.new_leader.is_some())
            .finish_non_exhaustive()
    }
}

impl LeaderCallbacks for Callbacks {
    fn on_started_leading(&self, token: CancellationToken) -> BoxFuture<'static, ()> {
        (self.started)(token)
    }

    fn on_stopped_leading(&self) {
        if let Some(stopped) = &self.stopped {
            stopped();
        }
    }

    fn on_new_leader(&self, identity: &str) {
        if let Some(new_leader) = &self.new_leader {
            new_leader(identity);
        }
    }
}
