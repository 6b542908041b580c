//! Health record model for monitored background components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use vaultpilot_traits::{FailureCategory, RecordKind};

use crate::storage::Record;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    /// A few consecutive failures
    Degraded,
    /// Failures reached the unresponsive threshold
    Unresponsive,
    /// Restarted, waiting for the first heartbeat
    Restarting,
    /// Automatic recovery stopped; needs an explicit reset
    Quarantined,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unresponsive => "unresponsive",
            HealthStatus::Restarting => "restarting",
            HealthStatus::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of one monitored component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub component_id: String,
    #[serde(default)]
    pub status: HealthStatus,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error_category: Option<FailureCategory>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_restart_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restart_count: u32,
    /// Whether silence counts as failure (watchers heartbeat on a cadence)
    #[serde(default)]
    pub expects_heartbeat: bool,
    pub updated_at: DateTime<Utc>,
}

impl HealthRecord {
    pub fn new(component_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            component_id: component_id.into(),
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            last_heartbeat: None,
            last_error_category: None,
            last_error: None,
            last_failure_at: None,
            last_restart_at: None,
            restart_count: 0,
            expects_heartbeat: false,
            updated_at: now,
        }
    }

    /// Latest sign of activity: a heartbeat, a restart or a failure report.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        [self.last_heartbeat, self.last_restart_at, self.last_failure_at]
            .into_iter()
            .flatten()
            .max()
    }

    /// Point from which the supervisor measures the backoff delay.
    pub fn backoff_reference(&self) -> DateTime<Utc> {
        [self.last_heartbeat, self.last_restart_at]
            .into_iter()
            .flatten()
            .max()
            .or(self.last_failure_at)
            .unwrap_or(self.updated_at)
    }
}

impl Record for HealthRecord {
    const KIND: RecordKind = RecordKind::Health;

    fn id(&self) -> &str {
        &self.component_id
    }

    fn render_body(&self) -> String {
        let mut body = format!(
            "# {}\n\n**Status:** {} · {} consecutive failure(s)\n",
            self.component_id, self.status, self.consecutive_failures
        );
        if self.status == HealthStatus::Quarantined {
            body.push_str("\nAutomatic recovery has stopped. Reset this component to resume.\n");
        }
        if let Some(error) = &self.last_error {
            let category = self.last_error_category.unwrap_or_default();
            body.push_str(&format!("\nLast error ({category}): {error}\n"));
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn backoff_reference_prefers_heartbeat_or_restart() {
        let now = Utc::now();
        let mut record = HealthRecord::new("scheduler", now - Duration::hours(1));
        assert_eq!(record.backoff_reference(), now - Duration::hours(1));

        record.last_failure_at = Some(now - Duration::minutes(10));
        assert_eq!(record.backoff_reference(), now - Duration::minutes(10));

        record.last_heartbeat = Some(now - Duration::minutes(30));
        record.last_restart_at = Some(now - Duration::minutes(5));
        assert_eq!(record.backoff_reference(), now - Duration::minutes(5));
    }

    #[test]
    fn last_activity_is_latest_of_all_signals() {
        let now = Utc::now();
        let mut record = HealthRecord::new("scheduler", now);
        assert!(record.last_activity().is_none());
        record.last_heartbeat = Some(now - Duration::minutes(3));
        record.last_failure_at = Some(now - Duration::minutes(1));
        assert_eq!(record.last_activity(), Some(now - Duration::minutes(1)));
    }

    #[test]
    fn quarantine_is_visible_in_body() {
        let mut record = HealthRecord::new("scheduler", Utc::now());
        record.status = HealthStatus::Quarantined;
        assert!(record.render_body().contains("Automatic recovery has stopped"));
    }
}
