//! Watchdog that restarts or quarantines unhealthy components.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use vaultpilot_traits::{FailureCategory, Result, VaultpilotError};

use crate::backoff::{BackoffDecision, BackoffPolicy};
use crate::health::{HealthOutcome, HealthTracker};
use crate::models::HealthStatus;

/// A background process the supervisor can restart.
#[async_trait]
pub trait ManagedComponent: Send + Sync {
    fn component_id(&self) -> &str;

    async fn restart(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub check_interval_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 15,
        }
    }
}

impl SupervisorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            return Err(VaultpilotError::Configuration(
                "supervisor.check_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Components marked failed for a missed heartbeat
    pub stale: Vec<String>,
    pub restarted: Vec<String>,
    pub restart_failed: Vec<String>,
    pub quarantined: Vec<String>,
    /// Components still inside their backoff window, with the remaining wait
    pub waiting: Vec<(String, u64)>,
}

impl ReconcileReport {
    pub fn is_quiet(&self) -> bool {
        self.stale.is_empty()
            && self.restarted.is_empty()
            && self.restart_failed.is_empty()
            && self.quarantined.is_empty()
    }
}

pub struct Supervisor {
    health: HealthTracker,
    backoff: BackoffPolicy,
    config: SupervisorConfig,
    components: RwLock<HashMap<String, Arc<dyn ManagedComponent>>>,
}

impl Supervisor {
    pub fn new(health: HealthTracker, backoff: BackoffPolicy, config: SupervisorConfig) -> Self {
        Self {
            health,
            backoff,
            config,
            components: RwLock::new(HashMap::new()),
        }
    }

    /// Make a component restartable. Components without a handle are only
    /// tracked and quarantined.
    pub fn register(&self, component: Arc<dyn ManagedComponent>) {
        let id = component.component_id().to_string();
        debug!(component_id = %id, "Registered managed component");
        self.components.write().insert(id, component);
    }

    /// One pass over every health record.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport {
            stale: self.health.mark_stale(now)?,
            ..ReconcileReport::default()
        };

        for record in self.health.list()? {
            if matches!(
                record.status,
                HealthStatus::Healthy | HealthStatus::Quarantined | HealthStatus::Restarting
            ) {
                continue;
            }
            let component_id = record.component_id.clone();
            let category = record.last_error_category.unwrap_or_default();
            let attempt = record.consecutive_failures.max(1);

            let delay = match self.backoff.next_delay(attempt, category) {
                BackoffDecision::Retry(delay) => delay,
                BackoffDecision::Escalate => {
                    let reason = format!(
                        "{category} failure escalated: {}",
                        record.last_error.as_deref().unwrap_or("no detail")
                    );
                    self.health.quarantine(&component_id, &reason, now)?;
                    report.quarantined.push(component_id);
                    continue;
                }
            };

            let elapsed = (now - record.backoff_reference()).to_std().unwrap_or_default();
            if elapsed < delay {
                let remaining = (delay - elapsed).as_millis() as u64;
                report.waiting.push((component_id, remaining));
                continue;
            }

            let handle = self.components.read().get(&component_id).cloned();
            let Some(handle) = handle else {
                continue;
            };
            if self.health.mark_restarting(&component_id, now)?.is_none() {
                continue;
            }

            info!(component_id = %component_id, attempt, "Restarting component");
            match handle.restart().await {
                Ok(()) => report.restarted.push(component_id),
                Err(err) => {
                    warn!(component_id = %component_id, error = %err, "Restart failed");
                    self.health.report(
                        &component_id,
                        HealthOutcome::failure(
                            FailureCategory::Transient,
                            format!("restart failed: {err}"),
                        ),
                        now,
                    )?;
                    report.restart_failed.push(component_id);
                }
            }
        }

        Ok(report)
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Supervisor shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.check_interval()) => {
                    match self.reconcile(Utc::now()).await {
                        Ok(report) if !report.is_quiet() => {
                            info!(
                                stale = report.stale.len(),
                                restarted = report.restarted.len(),
                                restart_failed = report.restart_failed.len(),
                                quarantined = report.quarantined.len(),
                                "Reconciliation pass"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "Reconciliation failed"),
                    }
                }
            }
        }

        Ok(())
    }
}
