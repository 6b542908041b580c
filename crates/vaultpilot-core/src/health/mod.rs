//! Health tracking for background components.
//!
//! Every monitored component (the scheduler loop, the engine, one entry per
//! schedule action) owns a health record. Reports move the record between
//! Healthy, Degraded and Unresponsive; exceeding the restart ceiling moves it
//! to Quarantined, which only [`HealthTracker::reset`] clears.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vaultpilot_traits::{FailureCategory, RecordKind, Result, VaultpilotError};

use crate::audit::AuditRecorder;
use crate::models::{HealthRecord, HealthStatus};
use crate::storage::TypedStore;

const UPDATE_RETRIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures at which a component counts as unresponsive
    pub unresponsive_threshold: u32,
    /// Consecutive failures beyond which a component is quarantined
    pub max_restart_attempts: u32,
    /// Silence after which a heartbeat-driven component is marked failed
    pub heartbeat_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unresponsive_threshold: 3,
            max_restart_attempts: 5,
            heartbeat_timeout_secs: 300,
        }
    }
}

impl HealthConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::seconds(self.heartbeat_timeout_secs.min(i64::MAX as u64) as i64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.unresponsive_threshold == 0 || self.max_restart_attempts == 0 {
            return Err(VaultpilotError::Configuration(
                "health thresholds must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_timeout_secs == 0 {
            return Err(VaultpilotError::Configuration(
                "health.heartbeat_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Status for a component with `failures` consecutive failures.
    fn status_for(&self, failures: u32) -> HealthStatus {
        if failures > self.max_restart_attempts {
            HealthStatus::Quarantined
        } else if failures >= self.unresponsive_threshold {
            HealthStatus::Unresponsive
        } else {
            HealthStatus::Degraded
        }
    }
}

/// Result of a heartbeat or health check.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthOutcome {
    Success,
    Failure {
        category: FailureCategory,
        message: String,
    },
}

impl HealthOutcome {
    pub fn failure(category: FailureCategory, message: impl Into<String>) -> Self {
        HealthOutcome::Failure {
            category,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct HealthTracker {
    store: TypedStore,
    audit: AuditRecorder,
    config: HealthConfig,
}

impl HealthTracker {
    pub fn new(store: TypedStore, audit: AuditRecorder, config: HealthConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn get(&self, component_id: &str) -> Result<Option<HealthRecord>> {
        Ok(self
            .store
            .get::<HealthRecord>(component_id)?
            .map(|v| v.record))
    }

    pub fn list(&self) -> Result<Vec<HealthRecord>> {
        self.store.list_records()
    }

    /// Start monitoring a component. Heartbeat-driven components are marked
    /// failed by [`mark_stale`](Self::mark_stale) when they go quiet.
    pub fn register(
        &self,
        component_id: &str,
        expects_heartbeat: bool,
        now: DateTime<Utc>,
    ) -> Result<HealthRecord> {
        let (record, created) = self.ensure(component_id, now, expects_heartbeat)?;
        if created || record.expects_heartbeat == expects_heartbeat {
            return Ok(record);
        }
        let update = self
            .store
            .update_with::<HealthRecord, _>(component_id, UPDATE_RETRIES, |current| {
                let mut next = current.clone();
                next.expects_heartbeat = expects_heartbeat;
                next.updated_at = now;
                Ok(Some(next))
            })?;
        Ok(update.after.record)
    }

    /// Apply a heartbeat or health check result. Unknown components are created on
    /// first report. A quarantined component is left untouched.
    pub fn report(
        &self,
        component_id: &str,
        outcome: HealthOutcome,
        now: DateTime<Utc>,
    ) -> Result<HealthRecord> {
        self.ensure(component_id, now, false)?;
        let config = &self.config;
        let update = self
            .store
            .update_with::<HealthRecord, _>(component_id, UPDATE_RETRIES, |current| {
                if current.status == HealthStatus::Quarantined {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.updated_at = now;
                match &outcome {
                    HealthOutcome::Success => {
                        next.consecutive_failures = 0;
                        next.status = HealthStatus::Healthy;
                        next.last_heartbeat = Some(now);
                    }
                    HealthOutcome::Failure { category, message } => {
                        next.consecutive_failures = current.consecutive_failures.saturating_add(1);
                        next.status = config.status_for(next.consecutive_failures);
                        next.last_error_category = Some(*category);
                        next.last_error = Some(message.clone());
                        next.last_failure_at = Some(now);
                    }
                }
                Ok(Some(next))
            })?;

        let before = &update.before;
        let after = &update.after.record;
        if update.changed && before.status != after.status {
            let reason = match &outcome {
                HealthOutcome::Success => "heartbeat".to_string(),
                HealthOutcome::Failure { category, message } => format!("{category}: {message}"),
            };
            self.record_transition(before.status, after, &reason);
        }
        Ok(update.after.record)
    }

    pub fn heartbeat(&self, component_id: &str, now: DateTime<Utc>) -> Result<HealthRecord> {
        self.report(component_id, HealthOutcome::Success, now)
    }

    /// Note that the supervisor restarted the component. Returns `None` when
    /// the component is quarantined and must not be restarted.
    pub fn mark_restarting(
        &self,
        component_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<HealthRecord>> {
        let update = self
            .store
            .update_with::<HealthRecord, _>(component_id, UPDATE_RETRIES, |current| {
                if current.status == HealthStatus::Quarantined {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.status = HealthStatus::Restarting;
                next.restart_count = current.restart_count.saturating_add(1);
                next.last_restart_at = Some(now);
                next.updated_at = now;
                Ok(Some(next))
            })?;
        if !update.changed {
            return Ok(None);
        }
        let attempt = format!("restart attempt {}", update.after.record.restart_count);
        self.record_transition(update.before.status, &update.after.record, &attempt);
        Ok(Some(update.after.record))
    }

    /// Stop automatic recovery for a component.
    pub fn quarantine(
        &self,
        component_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<HealthRecord> {
        let update = self
            .store
            .update_with::<HealthRecord, _>(component_id, UPDATE_RETRIES, |current| {
                if current.status == HealthStatus::Quarantined {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.status = HealthStatus::Quarantined;
                next.updated_at = now;
                Ok(Some(next))
            })?;
        if update.changed {
            self.record_transition(update.before.status, &update.after.record, reason);
        }
        Ok(update.after.record)
    }

    /// Explicit operator reset; the only way out of quarantine.
    pub fn reset(&self, component_id: &str, now: DateTime<Utc>) -> Result<HealthRecord> {
        if self.store.get::<HealthRecord>(component_id)?.is_none() {
            return Err(VaultpilotError::not_found(RecordKind::Health, component_id));
        }
        let update = self
            .store
            .update_with::<HealthRecord, _>(component_id, UPDATE_RETRIES, |current| {
                let mut next = current.clone();
                next.status = HealthStatus::Healthy;
                next.consecutive_failures = 0;
                next.last_error_category = None;
                next.last_error = None;
                next.last_heartbeat = Some(now);
                next.updated_at = now;
                Ok(Some(next))
            })?;
        info!(
            component_id,
            prior = %update.before.status,
            "Health record reset"
        );
        self.audit.record(
            "reset",
            component_id,
            HealthStatus::Healthy.as_str(),
            Some(format!("{} -> healthy: operator reset", update.before.status)),
        );
        Ok(update.after.record)
    }

    /// Record a missed heartbeat for every heartbeat-driven component that
    /// has been silent longer than the configured timeout. Returns the ids
    /// that were marked.
    pub fn mark_stale(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let timeout = self.config.heartbeat_timeout();
        let mut marked = Vec::new();
        for record in self.list()? {
            if !record.expects_heartbeat || record.status == HealthStatus::Quarantined {
                continue;
            }
            let reference = record.last_activity().unwrap_or(record.updated_at);
            if now - reference <= timeout {
                continue;
            }
            warn!(
                component_id = %record.component_id,
                silent_secs = (now - reference).num_seconds(),
                "Heartbeat missed"
            );
            self.report(
                &record.component_id,
                HealthOutcome::failure(FailureCategory::Transient, "heartbeat missed"),
                now,
            )?;
            marked.push(record.component_id);
        }
        Ok(marked)
    }

    fn ensure(
        &self,
        component_id: &str,
        now: DateTime<Utc>,
        expects_heartbeat: bool,
    ) -> Result<(HealthRecord, bool)> {
        if let Some(existing) = self.store.get::<HealthRecord>(component_id)? {
            return Ok((existing.record, false));
        }
        let mut record = HealthRecord::new(component_id, now);
        record.expects_heartbeat = expects_heartbeat;
        match self.store.create(&record) {
            Ok(_) => {
                self.audit
                    .record("registered", component_id, HealthStatus::Healthy.as_str(), None);
                Ok((record, true))
            }
            Err(VaultpilotError::Conflict { .. }) => {
                Ok((self.store.load::<HealthRecord>(component_id)?.record, false))
            }
            Err(err) => Err(err),
        }
    }

    fn record_transition(&self, prior: HealthStatus, record: &HealthRecord, reason: &str) {
        let event_kind = match record.status {
            HealthStatus::Healthy => "recovered",
            status => status.as_str(),
        };
        match record.status {
            HealthStatus::Quarantined => warn!(
                component_id = %record.component_id,
                prior = %prior,
                reason,
                "Component quarantined"
            ),
            _ => info!(
                component_id = %record.component_id,
                prior = %prior,
                status = %record.status,
                reason,
                "Health status changed"
            ),
        }
        self.audit.record(
            event_kind,
            &record.component_id,
            record.status.as_str(),
            Some(format!("{} -> {}: {}", prior, record.status, reason)),
        );
    }
}
