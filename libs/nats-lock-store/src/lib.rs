//! # nats-lock-store
//!
//! [`LockStore`](leader_election::LockStore) backed by a NATS JetStream KV
//! bucket, plus the connection manager it runs on.
//!
//! - **Connection manager** with bounded connect retries, exponential backoff
//!   and optional auth/encryption modes.
//! - **Lock store** mapping get/create/update onto KV entry/create/update with
//!   the entry revision as the opacity token.
#![warn(rust_2018_idioms, unreachable_pub, non_snake_case, non_upper_case_globals)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod client;
pub mod config;
pub mod error;
pub mod store;

pub use client::{ConnectionState, NatsClient};
pub use config::{NatsSecurityMode, NatsStoreConfig};
pub use error::{NatsStoreError, NatsStoreResult};
pub use store::NatsLockStore;

/// Connect with `config` and open its bucket.
pub async fn connect(config: NatsStoreConfig) -> NatsStoreResult<(NatsClient, NatsLockStore)> {
    let client = NatsClient::new(config);
    client.connect().await?;
    let store = NatsLockStore::open(&client).await?;
    Ok((client, store))
}
