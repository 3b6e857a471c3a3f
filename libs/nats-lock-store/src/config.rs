//! Connection and bucket settings for the NATS lock store.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NatsStoreError, NatsStoreResult};

pub const DEFAULT_SERVER: &str = "nats://127.0.0.1:4222";
pub const DEFAULT_BUCKET: &str = "leader_election";
/// Revisions kept per record, enough to inspect recent handovers.
pub const DEFAULT_HISTORY: i64 = 5;
pub const DEFAULT_CONNECT_RETRY_MAX: u32 = 5;

/// How the client authenticates to the NATS servers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatsSecurityMode {
    #[default]
    None,
    UserPassword,
    Token,
    Nkey,
    Tls,
    CredsFile,
}

impl fmt::Display for NatsSecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NatsSecurityMode::None => "none",
            NatsSecurityMode::UserPassword => "user_password",
            NatsSecurityMode::Token => "token",
            NatsSecurityMode::Nkey => "nkey",
            NatsSecurityMode::Tls => "tls",
            NatsSecurityMode::CredsFile => "creds_file",
        };
        f.write_str(s)
    }
}

impl FromStr for NatsSecurityMode {
    type Err = NatsStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(NatsSecurityMode::None),
            "user_password" => Ok(NatsSecurityMode::UserPassword),
            "token" => Ok(NatsSecurityMode::Token),
            "nkey" => Ok(NatsSecurityMode::Nkey),
            "tls" => Ok(NatsSecurityMode::Tls),
            "creds_file" => Ok(NatsSecurityMode::CredsFile),
            other => Err(NatsStoreError::Config(format!(
                "unknown NATS security mode '{other}'"
            ))),
        }
    }
}

/// Settings for [`NatsClient`](crate::NatsClient) and the KV bucket holding
/// lock records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsStoreConfig {
    pub servers: Vec<String>,
    pub bucket: String,
    pub history: i64,
    pub security_mode: NatsSecurityMode,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub nkey_seed_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub tls_ca_path: Option<PathBuf>,
    pub creds_file_path: Option<PathBuf>,
    pub connect_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
    /// Extra attempts after the first failed connect.
    pub connect_retry_max: u32,
}

impl Default for NatsStoreConfig {
    fn default() -> Self {
        Self {
            servers: vec![DEFAULT_SERVER.to_owned()],
            bucket: DEFAULT_BUCKET.to_owned(),
            history: DEFAULT_HISTORY,
            security_mode: NatsSecurityMode::None,
            username: None,
            password: None,
            token: None,
            nkey_seed_path: None,
            tls_cert_path: None,
            tls_key_path: None,
            tls_ca_path: None,
            creds_file_path: None,
            connect_timeout: None,
            request_timeout: None,
            connect_retry_max: DEFAULT_CONNECT_RETRY_MAX,
        }
    }
}

impl NatsStoreConfig {
    /// Check the fields that can be checked without connecting.
    pub fn validate(&self) -> NatsStoreResult<()> {
        if self.servers.iter().all(|s| s.trim().is_empty()) {
            return Err(NatsStoreError::Config(
                "at least one NATS server url is required".into(),
            ));
        }
        if self.bucket.is_empty()
            || !self
                .bucket
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        {
            return Err(NatsStoreError::Config(format!(
                "invalid KV bucket name '{}': use letters, digits, '-' or '_'",
                self.bucket
            )));
        }
        if self.history < 1 || self.history > 64 {
            return Err(NatsStoreError::Config(format!(
                "KV history must be between 1 and 64, got {}",
                self.history
            )));
        }
        Ok(())
    }
}
