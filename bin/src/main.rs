#![allow(clippy::cognitive_complexity)]
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures::FutureExt;

mod config;
mod startup_health;

use config::{
    cli::{self, Backend, Parser},
    trace,
};
use external_api::{ExternalApi, Health};
use leader_election::{Callbacks, ElectionOutcome, LeaderElector, LockStore, MemoryLockStore};
use nats_lock_store::NatsClient;
use startup_health::{fail_startup, verify_background_task_running, verify_startup_subsystems};
use tokio::{runtime::Builder, signal, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::*;

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const CONNECTION_POLL_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_SLACK: Duration = Duration::from_secs(1);

fn main() -> Result<ExitCode> {
    let dotenv_res = dotenv::dotenv();
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.leasehold_log)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv_res {
        debug!(?err, ".env file not loaded");
    }

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    // default num threads will be num logical CPUs
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    let rt = builder.build()?;

    let code = rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => {
                error!(?err, "failed to start elector");
                ExitCode::FAILURE
            }
            Ok(Err(err)) => {
                error!(?err, "exited with error");
                ExitCode::FAILURE
            }
            Ok(Ok(code)) => {
                debug!("exiting...");
                code
            }
        }
    });

    Ok(code)
}

async fn start(config: cli::Config) -> Result<ExitCode> {
    lazy_static::initialize(&external_api::metrics::START_TIME);
    info!(backend = ?config.backend, "lock record backend");

    match config.backend {
        Backend::Memory => {
            warn!("memory backend only coordinates electors within this process");
            run_election(config, MemoryLockStore::new(), None).await
        }
        Backend::Nats => {
            info!(servers = ?config.nats_servers, bucket = %config.nats_bucket, "connecting to NATS");
            let (client, store) = nats_lock_store::connect(config.nats_config())
                .await
                .map_err(|e| anyhow!("NATS connection failed: {e}"))?;
            info!("NATS connection established");
            let res = run_election(config, store, Some(client.clone())).await;
            client.disconnect().await;
            res
        }
    }
}

async fn run_election<S>(
    config: cli::Config,
    store: S,
    nats_client: Option<NatsClient>,
) -> Result<ExitCode>
where
    S: LockStore + 'static,
{
    let heartbeat = Duration::from_secs(config.retry_period.max(1));
    let callbacks = Callbacks::new(move |token| lead(token, heartbeat).boxed())
        .on_stopped_leading(|| info!("stopped leading"))
        .on_new_leader(|leader| info!(%leader, "new leader observed"));

    let mut elector = LeaderElector::new(config.election_config(), store, callbacks)
        .context("invalid election config")?;
    info!(
        identity = elector.identity(),
        record = %elector.record_key(),
        "joining election"
    );

    let api = ExternalApi::new(config.external_api, elector.subscribe());
    let token = CancellationToken::new();
    let api_sender = api.sender();
    let mut api_guard = api.start(token.clone());

    let mut election_task = tokio::spawn({
        let token = token.clone();
        async move { elector.run(token).await }
    });
    let signal_task = tokio::spawn(shutdown_signal(token.clone()));
    let backend = format!("{:?}", config.backend).to_lowercase();
    // long enough for the release write, which is bounded by the renew deadline
    let grace = Duration::from_secs(config.renew_deadline) + SHUTDOWN_SLACK;

    // Keep health BAD until all startup-critical tasks are confirmed running.
    if let Err(err) =
        verify_startup_subsystems(api_guard.task(), &mut election_task, &backend).await
    {
        let err = fail_startup(err, &token, &api_sender, &mut election_task, grace).await;
        return Err(err);
    }
    let mut monitor = nats_client
        .map(|client| spawn_connection_monitor(client, api_sender.clone(), token.clone()));
    if let Some(monitor) = monitor.as_mut() {
        if let Err(err) = verify_background_task_running("NATS connection monitor", monitor).await
        {
            let err = fail_startup(err, &token, &api_sender, &mut election_task, grace).await;
            return Err(err);
        }
    }

    debug!("changing health to good after startup checks passed");
    api_sender
        .send(Health::Good)
        .await
        .context("error occurred in changing health status to Good")?;

    let outcome = election_task.await.map_err(|err| anyhow!(err));
    let _ = api_sender.send(Health::Bad).await;
    token.cancel();
    signal_task.abort();

    if let Err(err) = api_guard.task().await {
        error!(?err, "error waiting for web server API");
    }
    if let Some(monitor) = monitor {
        if let Err(err) = monitor.await {
            error!(?err, "error waiting for NATS connection monitor");
        }
    }

    match outcome? {
        ElectionOutcome::Cancelled => {
            info!("election cancelled, shutting down");
            Ok(ExitCode::SUCCESS)
        }
        ElectionOutcome::LeadershipLost => {
            error!("leadership lost, exiting");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Work done while holding leadership. Runs until `token` is cancelled.
async fn lead(token: CancellationToken, heartbeat: Duration) {
    info!("started leading");
    let mut ticker = tokio::time::interval(heartbeat);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => trace!("leader heartbeat"),
        }
    }
    debug!("leader workload stopped");
}

fn spawn_connection_monitor(
    client: NatsClient,
    health: mpsc::Sender<Health>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CONNECTION_POLL_INTERVAL);
        let mut was_connected = true;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("NATS connection monitor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let is_connected = client.is_connected().await;
                    if is_connected != was_connected {
                        was_connected = is_connected;
                        if is_connected {
                            info!("NATS connection restored");
                            let _ = health.send(Health::Good).await;
                        } else {
                            warn!("NATS connection lost");
                            let _ = health.send(Health::Bad).await;
                        }
                    }
                }
            }
        }
    })
}

async fn shutdown_signal(token: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    let ret = {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => res.map_err(|err| anyhow!(err)),
            _ = term.recv() => Ok(()),
        }
    };
    #[cfg(not(unix))]
    let ret = signal::ctrl_c().await.map_err(|err| anyhow!(err));
    info!("shutdown signal received");
    token.cancel();
    ret
}
