//! NATS connection manager with connect retries and optional auth/encryption.
//!
//! Wraps `async-nats` so the lock store only ever sees a JetStream KV bucket.
//! Reconnects after the first successful connect are handled by async-nats.

use std::sync::Arc;
use std::time::Duration;

use async_nats::ConnectOptions;
use async_nats::jetstream;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{NatsSecurityMode, NatsStoreConfig};
use crate::error::{NatsStoreError, NatsStoreResult};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-call KV timeout unless `request_timeout` is set.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

const CONNECT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Connect backoff doubles from the base delay up to this cap.
const MAX_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Connection state as seen by health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Attempting to (re)connect.
    Reconnecting,
    /// Never connected, or shut down.
    Disconnected,
}

struct ClientInner {
    nats_client: Option<async_nats::Client>,
    state: ConnectionState,
    config: NatsStoreConfig,
}

/// NATS connection manager for the lock store.
#[derive(Clone)]
pub struct NatsClient {
    inner: Arc<RwLock<ClientInner>>,
    request_timeout: Duration,
}

impl NatsClient {
    /// Unconnected client; see [`connect`](Self::connect).
    pub fn new(config: NatsStoreConfig) -> Self {
        let request_timeout = config.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        Self {
            inner: Arc::new(RwLock::new(ClientInner {
                nats_client: None,
                state: ConnectionState::Disconnected,
                config,
            })),
            request_timeout,
        }
    }

    async fn build_connect_options(config: &NatsStoreConfig) -> NatsStoreResult<ConnectOptions> {
        let mut opts = ConnectOptions::new();

        let mode = config.security_mode;
        match mode {
            NatsSecurityMode::None => {}
            NatsSecurityMode::UserPassword => {
                let user = required(mode, "username", config.username.as_ref())?;
                let pass = required(mode, "password", config.password.as_ref())?;
                opts = opts.user_and_password(user.clone(), pass.clone());
            }
            NatsSecurityMode::Token => {
                opts = opts.token(required(mode, "token", config.token.as_ref())?.clone());
            }
            NatsSecurityMode::Nkey => {
                let path = required(mode, "nkey_seed_path", config.nkey_seed_path.as_ref())?;
                let seed = std::fs::read_to_string(path).map_err(|e| {
                    NatsStoreError::Config(format!("cannot read nkey seed {}: {e}", path.display()))
                })?;
                opts = opts.nkey(seed.trim().to_owned());
            }
            NatsSecurityMode::Tls => {
                let cert = required(mode, "tls_cert_path", config.tls_cert_path.as_ref())?;
                let key = required(mode, "tls_key_path", config.tls_key_path.as_ref())?;
                opts = opts
                    .add_client_certificate(cert.clone(), key.clone())
                    .require_tls(true);
            }
            NatsSecurityMode::CredsFile => {
                let path = required(mode, "creds_file_path", config.creds_file_path.as_ref())?;
                opts = opts.credentials_file(path).await.map_err(|e| {
                    NatsStoreError::Config(format!("cannot load creds file {}: {e}", path.display()))
                })?;
            }
        }

        // a CA bundle alone means server-verified TLS in any mode
        if let Some(ca) = &config.tls_ca_path {
            opts = opts.add_root_certificates(ca.clone()).require_tls(true);
        }

        Ok(opts
            .connection_timeout(config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
            .retry_on_initial_connect())
    }

    /// Establish the NATS connection, retrying with exponential backoff up to
    /// `connect_retry_max` extra times.
    pub async fn connect(&self) -> NatsStoreResult<()> {
        let (config, current_state) = {
            let inner = self.inner.read().await;
            (inner.config.clone(), inner.state)
        };

        if current_state == ConnectionState::Connected {
            debug!("NATS client already connected, skipping connect");
            return Ok(());
        }
        config.validate()?;

        info!(
            servers = ?config.servers,
            security_mode = %config.security_mode,
            connect_retry_max = config.connect_retry_max,
            "connecting to NATS"
        );

        {
            let mut inner = self.inner.write().await;
            inner.nats_client = None;
            inner.state = ConnectionState::Reconnecting;
        }

        let total_attempts = config.connect_retry_max.saturating_add(1);
        let mut attempt = 0u32;
        loop {
            let opts = match Self::build_connect_options(&config).await {
                Ok(opts) => opts,
                Err(err) => {
                    self.set_state(ConnectionState::Disconnected).await;
                    return Err(err);
                }
            };

            let err = match opts.connect(config.servers.clone()).await {
                Ok(client) => {
                    let mut inner = self.inner.write().await;
                    inner.nats_client = Some(client);
                    inner.state = ConnectionState::Connected;
                    info!(
                        attempt = attempt + 1,
                        total_attempts, "NATS connection established"
                    );
                    return Ok(());
                }
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= total_attempts {
                error!(
                    attempts = total_attempts,
                    error = %err,
                    "NATS connection failed after all retry attempts"
                );
                self.set_state(ConnectionState::Disconnected).await;
                return Err(NatsStoreError::Transport(format!(
                    "NATS connection failed after {total_attempts} attempt(s): {err}"
                )));
            }

            let delay = CONNECT_RETRY_BASE_DELAY
                .saturating_mul(2u32.saturating_pow(attempt - 1))
                .min(MAX_CONNECT_RETRY_DELAY);
            warn!(
                attempt,
                total_attempts,
                retry_in_ms = delay.as_millis(),
                error = %err,
                "NATS connection attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        let mut inner = self.inner.write().await;
        inner.state = state;
    }

    /// State reported by async-nats once a client exists.
    pub async fn connection_state(&self) -> ConnectionState {
        let inner = self.inner.read().await;
        if let Some(ref client) = inner.nats_client {
            match client.connection_state() {
                async_nats::connection::State::Connected => ConnectionState::Connected,
                async_nats::connection::State::Disconnected => ConnectionState::Reconnecting,
                async_nats::connection::State::Pending => ConnectionState::Reconnecting,
            }
        } else {
            inner.state
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection_state().await == ConnectionState::Connected
    }

    /// Per-call timeout applied by the lock store.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Configured bucket name and history depth.
    pub async fn bucket(&self) -> (String, i64) {
        let inner = self.inner.read().await;
        (inner.config.bucket.clone(), inner.config.history)
    }

    pub async fn jetstream_context(&self) -> NatsStoreResult<jetstream::Context> {
        let client = self.nats_client().await?;
        Ok(jetstream::new(client))
    }

    /// Open `bucket`, creating it with `history` revisions per key if absent.
    pub async fn get_or_create_kv_bucket(
        &self,
        bucket: &str,
        history: i64,
    ) -> NatsStoreResult<jetstream::kv::Store> {
        let js = self.jetstream_context().await?;
        match js.get_key_value(bucket.to_string()).await {
            Ok(store) => Ok(store),
            Err(get_err) => {
                debug!(bucket, error = %get_err, "creating missing JetStream KV bucket");
                js.create_key_value(jetstream::kv::Config {
                    bucket: bucket.to_string(),
                    history,
                    ..Default::default()
                })
                .await
                .map_err(|create_err| {
                    NatsStoreError::Transport(format!(
                        "failed to create JetStream KV bucket '{bucket}': {create_err} (get error: {get_err})"
                    ))
                })
            }
        }
    }

    async fn nats_client(&self) -> NatsStoreResult<async_nats::Client> {
        let inner = self.inner.read().await;
        inner
            .nats_client
            .clone()
            .ok_or_else(|| NatsStoreError::NotConnected("NATS client not connected".into()))
    }

    pub async fn disconnect(&self) {
        let mut inner = self.inner.write().await;
        inner.nats_client = None;
        inner.state = ConnectionState::Disconnected;
        info!("NATS client disconnected");
    }
}

impl std::fmt::Debug for NatsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsClient")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn required<'a, T>(
    mode: NatsSecurityMode,
    field: &str,
    value: Option<&'a T>,
) -> NatsStoreResult<&'a T> {
    value.ok_or_else(|| NatsStoreError::Config(format!("{mode} security mode requires '{field}'")))
}
