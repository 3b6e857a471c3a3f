//! # leader-election
//!
//! Lease-based leader election over a compare-and-swap lock record.
//!
//! Participants race to claim a single named [`LeaseRecord`] held in a
//! [`LockStore`]. The winner renews its claim every `retry_period`; the others
//! poll and take over once the claim expires or is vacated. A leader that
//! cannot renew within `renew_deadline` steps down on its own, which keeps at
//! most one participant leading as long as
//! `lease_duration > renew_deadline > retry_period`.
//!
//! ```no_run
//! use futures::FutureExt;
//! use leader_election::{Callbacks, ElectionConfig, LeaderElector, MemoryLockStore};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> leader_election::ElectionResult<()> {
//! let config = ElectionConfig::new("scheduler").with_namespace("default");
//! let callbacks = Callbacks::new(|token| {
//!     async move { token.cancelled().await }.boxed()
//! });
//! let mut elector = LeaderElector::new(config, MemoryLockStore::new(), callbacks)?;
//! let outcome = elector.run(CancellationToken::new()).await;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```
#![warn(
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

pub mod callbacks;
pub mod config;
pub mod elector;
pub mod error;
pub mod identity;
pub mod memory;
pub mod metrics;
pub mod record;
pub mod store;

pub use callbacks::{Callbacks, LeaderCallbacks};
pub use config::ElectionConfig;
pub use elector::{ElectionOutcome, ElectionPhase, ElectionStatus, LeaderElector};
pub use error::{ElectionError, ElectionResult, StoreError, StoreResult};
pub use memory::MemoryLockStore;
pub use record::LeaseRecord;
pub use store::{LockStore, OpacityToken, RecordKey, Versioned};
