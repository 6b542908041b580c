//! Long-running daemon: the scheduler poll loop under supervision.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::AppCore;
use crate::health::{HealthOutcome, HealthTracker};
use crate::scheduler::Scheduler;
use crate::supervisor::ManagedComponent;

/// Health component id of the scheduler poll loop.
pub const SCHEDULER_LOOP_ID: &str = "scheduler";

struct RunningLoop {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Scheduler poll loop running as a tokio task.
///
/// Every completed tick is a heartbeat; a tick error is a failure report.
/// A restart spawns a fresh task and tells the previous one to exit after
/// its current tick, so an in-flight firing still records its result.
pub struct SchedulerLoop {
    scheduler: Scheduler,
    health: HealthTracker,
    shutdown: broadcast::Sender<()>,
    current: Mutex<Option<RunningLoop>>,
}

impl SchedulerLoop {
    pub fn new(scheduler: Scheduler, health: HealthTracker, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            scheduler,
            health,
            shutdown,
            current: Mutex::new(None),
        }
    }

    /// Spawn the loop, retiring any task already running.
    pub fn start(&self) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            self.scheduler.clone(),
            self.health.clone(),
            self.shutdown.subscribe(),
            cancel.clone(),
        ));
        let previous = self.current.lock().replace(RunningLoop { handle, cancel });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Ask the loop to exit after its current tick and wait for it.
    pub async fn stop(&self) {
        let running = self.current.lock().take();
        let Some(running) = running else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            error!(error = %e, "Scheduler loop task panicked");
        }
    }
}

async fn poll_loop(
    scheduler: Scheduler,
    health: HealthTracker,
    mut shutdown: broadcast::Receiver<()>,
    cancel: CancellationToken,
) {
    let interval = scheduler.config().poll_interval();
    info!(interval_secs = interval.as_secs(), "Scheduler loop started");
    loop {
        let now = Utc::now();
        match scheduler.tick(now).await {
            Ok(report) => {
                if !report.fired.is_empty() || !report.errors.is_empty() {
                    info!(
                        fired = report.fired.len(),
                        skipped = report.skipped.len(),
                        deferred = report.deferred.len(),
                        errors = report.errors.len(),
                        "Scheduler tick"
                    );
                }
                if let Err(e) = health.heartbeat(SCHEDULER_LOOP_ID, now) {
                    warn!(error = %e, "Failed to record scheduler heartbeat");
                }
            }
            Err(err) => {
                error!(error = %err, "Scheduler tick failed");
                let outcome = HealthOutcome::failure(err.category(), err.to_string());
                if let Err(e) = health.report(SCHEDULER_LOOP_ID, outcome, now) {
                    warn!(error = %e, "Failed to record scheduler failure");
                }
            }
        }

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Scheduler loop shutting down");
                break;
            }
            _ = cancel.cancelled() => {
                debug!("Scheduler loop retired");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[async_trait]
impl ManagedComponent for SchedulerLoop {
    fn component_id(&self) -> &str {
        SCHEDULER_LOOP_ID
    }

    async fn restart(&self) -> anyhow::Result<()> {
        debug!("Respawning scheduler loop");
        self.start();
        Ok(())
    }
}

/// Run the scheduler loop and the supervisor until ctrl-c.
pub async fn run_daemon(core: &AppCore) -> anyhow::Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    run_daemon_until(core, shutdown_tx.clone(), async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received ctrl-c"),
            Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
        }
    })
    .await
}

/// Run the daemon until `stop` resolves, then broadcast shutdown.
pub async fn run_daemon_until(
    core: &AppCore,
    shutdown_tx: broadcast::Sender<()>,
    stop: impl std::future::Future<Output = ()>,
) -> anyhow::Result<()> {
    let now = Utc::now();
    core.health.register(SCHEDULER_LOOP_ID, true, now)?;

    let scheduler_loop = Arc::new(SchedulerLoop::new(
        core.scheduler.clone(),
        core.health.clone(),
        shutdown_tx.clone(),
    ));
    core.supervisor.register(scheduler_loop.clone());
    scheduler_loop.start();

    let supervisor = core.supervisor.clone();
    let supervisor_shutdown = shutdown_tx.subscribe();
    let supervisor_task = tokio::spawn(async move { supervisor.run(supervisor_shutdown).await });

    info!(vault = %core.vault_path.display(), "Daemon running");
    stop.await;

    info!("Shutting down daemon");
    let _ = shutdown_tx.send(());
    match supervisor_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Supervisor exited with error"),
        Err(e) => error!(error = %e, "Supervisor task panicked"),
    }
    scheduler_loop.stop().await;
    Ok(())
}
