use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use external_api::Health;
use leader_election::ElectionOutcome;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

const STARTUP_STABILIZATION_WINDOW: Duration = Duration::from_millis(300);

pub async fn verify_startup_subsystems(
    api_task: &mut JoinHandle<()>,
    election_task: &mut JoinHandle<ElectionOutcome>,
    backend: &str,
) -> Result<()> {
    verify_background_task_running("external API", api_task)
        .await
        .with_context(|| format!("{backend} startup check failed"))?;
    verify_election_task_running(election_task)
        .await
        .with_context(|| format!("{backend} startup check failed"))?;
    Ok(())
}

pub async fn verify_election_task_running(task: &mut JoinHandle<ElectionOutcome>) -> Result<()> {
    match tokio::time::timeout(STARTUP_STABILIZATION_WINDOW, task).await {
        Err(_) => Ok(()),
        Ok(join_res) => match join_res {
            Ok(outcome) => Err(anyhow!(
                "election exited during startup stabilization window: {outcome:?}"
            )),
            Err(err) => Err(anyhow!("election panicked during startup: {err}")),
        },
    }
}

/// Mark health bad, cancel `token` and wait up to `grace` for the election
/// loop to stop (and release) before handing back `err`.
pub async fn fail_startup(
    err: anyhow::Error,
    token: &CancellationToken,
    health: &mpsc::Sender<Health>,
    election_task: &mut JoinHandle<ElectionOutcome>,
    grace: Duration,
) -> anyhow::Error {
    let _ = health.send(Health::Bad).await;
    token.cancel();
    if !election_task.is_finished() {
        match tokio::time::timeout(grace, &mut *election_task).await {
            Err(_) => {
                warn!(?grace, "election did not stop after failed startup, aborting");
                election_task.abort();
            }
            Ok(Err(join_err)) => error!(?join_err, "election task failed during shutdown"),
            Ok(Ok(_)) => {}
        }
    }
    err
}

pub async fn verify_background_task_running(name: &str, task: &mut JoinHandle<()>) -> Result<()> {
    match tokio::time::timeout(STARTUP_STABILIZATION_WINDOW, task).await {
        Err(_) => Ok(()),
        Ok(join_res) => match join_res {
            Ok(()) => Err(anyhow!("{name} exited during startup stabilization window")),
            Err(err) => Err(anyhow!("{name} panicked during startup: {err}")),
        },
    }
}
