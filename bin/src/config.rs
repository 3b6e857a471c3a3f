//! daemon configs

pub mod cli {
    //! Parse from either cli or env var

    use std::{net::SocketAddr, path::PathBuf, time::Duration};

    pub use clap::Parser;
    use clap::{ArgAction, ValueEnum};
    use leader_election::{ElectionConfig, identity::DEFAULT_NAMESPACE_FILE};
    use nats_lock_store::{NatsSecurityMode, NatsStoreConfig, config as nats};

    /// Default external api
    pub static DEFAULT_EXTERNAL_API: &str = "[::]:3333";
    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "leasehold-worker";
    /// default log level. Can use this argument or LEASEHOLD_LOG env var
    pub const DEFAULT_LEASEHOLD_LOG: &str = "info";
    /// default lease duration (seconds)
    pub const DEFAULT_LEASE_DURATION: u64 = 15;
    /// default renew deadline (seconds)
    pub const DEFAULT_RENEW_DEADLINE: u64 = 10;
    /// default retry period (seconds)
    pub const DEFAULT_RETRY_PERIOD: u64 = 2;
    /// default NATS request timeout (ms)
    pub const DEFAULT_NATS_REQUEST_TIMEOUT: u64 = 2000;

    /// Where lock records are kept
    #[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Backend {
        /// in-process map, only useful for a single instance or testing
        Memory,
        /// NATS JetStream KV bucket
        Nats,
    }

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "leasehold", bin_name = "leasehold", about, long_about = None)]
    /// parses from cli & environment var. leasehold will load `.env` in the working dir as well
    pub struct Config {
        /// name of the lock record to contend for
        #[clap(long, env = "ELECTION_NAME", value_parser)]
        pub name: String,
        /// namespace of the lock record. Read from `namespace_file` if unset
        #[clap(long, env = "ELECTION_NAMESPACE", value_parser)]
        pub namespace: Option<String>,
        /// file holding the deployment namespace
        #[clap(long, env, value_parser, default_value = DEFAULT_NAMESPACE_FILE)]
        pub namespace_file: PathBuf,
        /// identity of this instance. Defaults to `<hostname>_<uuid>`
        #[clap(long, env = "ELECTION_ID", value_parser)]
        pub election_id: Option<String>,
        /// seconds a claim stays valid without renewal
        #[clap(long, env, value_parser, default_value_t = DEFAULT_LEASE_DURATION)]
        pub lease_duration: u64,
        /// seconds the leader keeps retrying renewal before stepping down
        #[clap(long, env, value_parser, default_value_t = DEFAULT_RENEW_DEADLINE)]
        pub renew_deadline: u64,
        /// seconds between acquire/renew attempts
        #[clap(long, env, value_parser, default_value_t = DEFAULT_RETRY_PERIOD)]
        pub retry_period: u64,
        /// vacate the lock record on shutdown so a successor takes over immediately
        #[clap(long, env, value_parser, action = ArgAction::Set, default_value_t = true)]
        pub release_on_cancel: bool,
        /// lock record backend
        #[clap(long, env, value_enum, default_value_t = Backend::Nats)]
        pub backend: Backend,
        /// comma separated NATS server urls
        #[clap(long, env, value_parser, value_delimiter = ',', default_value = nats::DEFAULT_SERVER)]
        pub nats_servers: Vec<String>,
        /// JetStream KV bucket holding lock records
        #[clap(long, env, value_parser, default_value = nats::DEFAULT_BUCKET)]
        pub nats_bucket: String,
        /// none, user_password, token, nkey, tls or creds_file
        #[clap(long, env, value_parser, default_value = "none")]
        pub nats_security_mode: NatsSecurityMode,
        /// NATS username (user_password mode)
        #[clap(long, env, value_parser)]
        pub nats_username: Option<String>,
        /// NATS password (user_password mode)
        #[clap(long, env, value_parser)]
        pub nats_password: Option<String>,
        /// NATS token (token mode)
        #[clap(long, env, value_parser)]
        pub nats_token: Option<String>,
        /// nkey seed file (nkey mode)
        #[clap(long, env, value_parser)]
        pub nats_nkey_seed_path: Option<PathBuf>,
        /// client certificate (tls mode)
        #[clap(long, env, value_parser)]
        pub nats_tls_cert_path: Option<PathBuf>,
        /// client key (tls mode)
        #[clap(long, env, value_parser)]
        pub nats_tls_key_path: Option<PathBuf>,
        /// CA bundle used to verify the servers
        #[clap(long, env, value_parser)]
        pub nats_tls_ca_path: Option<PathBuf>,
        /// credentials file (creds_file mode)
        #[clap(long, env, value_parser)]
        pub nats_creds_file_path: Option<PathBuf>,
        /// extra connect attempts after the first failure
        #[clap(long, env, value_parser, default_value_t = nats::DEFAULT_CONNECT_RETRY_MAX)]
        pub nats_connect_retry_max: u32,
        /// per-call NATS timeout (ms)
        #[clap(long, env, value_parser, default_value_t = DEFAULT_NATS_REQUEST_TIMEOUT)]
        pub nats_request_timeout: u64,
        /// the address for the health/status api
        #[clap(long, env, value_parser, default_value = DEFAULT_EXTERNAL_API)]
        pub external_api: SocketAddr,
        /// Worker thread name
        #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// number of worker threads, defaults to number of logical CPUs
        #[clap(long, env, value_parser)]
        pub threads: Option<usize>,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_LEASEHOLD_LOG)]
        pub leasehold_log: String,
    }

    impl Config {
        /// Election settings, before identity/namespace defaults are resolved
        pub fn election_config(&self) -> ElectionConfig {
            let mut cfg = ElectionConfig::new(self.name.clone())
                .with_timings(
                    Duration::from_secs(self.lease_duration),
                    Duration::from_secs(self.renew_deadline),
                    Duration::from_secs(self.retry_period),
                )
                .with_release_on_cancel(self.release_on_cancel);
            if let Some(id) = &self.election_id {
                cfg = cfg.with_identity(id.clone());
            }
            if let Some(ns) = &self.namespace {
                cfg = cfg.with_namespace(ns.clone());
            }
            cfg.namespace_file = self.namespace_file.clone();
            cfg
        }

        /// NATS connection settings
        pub fn nats_config(&self) -> NatsStoreConfig {
            NatsStoreConfig {
                servers: self.nats_servers.clone(),
                bucket: self.nats_bucket.clone(),
                security_mode: self.nats_security_mode,
                username: self.nats_username.clone(),
                password: self.nats_password.clone(),
                token: self.nats_token.clone(),
                nkey_seed_path: self.nats_nkey_seed_path.clone(),
                tls_cert_path: self.nats_tls_cert_path.clone(),
                tls_key_path: self.nats_tls_key_path.clone(),
                tls_ca_path: self.nats_tls_ca_path.clone(),
                creds_file_path: self.nats_creds_file_path.clone(),
                request_timeout: Some(Duration::from_millis(self.nats_request_timeout)),
                connect_retry_max: self.nats_connect_retry_max,
                ..NatsStoreConfig::default()
            }
        }
    }

}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    /// log as "json", "pretty" or "standard" (unstructured)
    static DEFAULT_LOG_FORMAT: &str = "standard";

    /// Logging configuration
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_frmt: String,
    }

    impl Config {
        /// Install the global subscriber. Level comes from LEASEHOLD_LOG,
        /// format from LOG_FORMAT
        pub fn parse(leasehold_log: &str) -> Result<Self> {
            let log_frmt =
                std::env::var("LOG_FORMAT").unwrap_or_else(|_| DEFAULT_LOG_FORMAT.to_owned());

            let filter = EnvFilter::try_new(leasehold_log)
                .or_else(|_| EnvFilter::try_new("info"))?
                .add_directive("hyper=off".parse()?)
                .add_directive("async_nats=warn".parse()?);

            match &log_frmt[..] {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .init();
                }
                "pretty" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new()),
                        )
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer())
                        .init();
                }
            }

            Ok(Self { log_frmt })
        }
    }
}
