//! Schedule record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vaultpilot_traits::{FailureCategory, RecordKind};

use crate::storage::Record;

/// Timezone value meaning "the host's local zone".
pub const LOCAL_TIMEZONE: &str = "local";

/// What to do when the process was down across one or more firings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedStrategy {
    /// Drop missed occurrences, wait for the next window
    #[default]
    Skip,
    /// Fire once right away for the most recent missed occurrence
    RunImmediately,
    /// Fire once on the following poll cycle
    RunAtNextWindow,
}

impl MissedStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            MissedStrategy::Skip => "skip",
            MissedStrategy::RunImmediately => "run_immediately",
            MissedStrategy::RunAtNextWindow => "run_at_next_window",
        }
    }
}

impl fmt::Display for MissedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissedStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "skip" => Ok(MissedStrategy::Skip),
            "run_immediately" => Ok(MissedStrategy::RunImmediately),
            "run_at_next_window" => Ok(MissedStrategy::RunAtNextWindow),
            other => Err(format!("unknown missed strategy '{other}'")),
        }
    }
}

fn default_timezone() -> String {
    LOCAL_TIMEZONE.to_string()
}

fn default_true() -> bool {
    true
}

/// A recurring trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: String,
    pub name: String,
    /// 5-field cron expression (minute resolution)
    pub cron_expression: String,
    /// Opaque action descriptor handed to the dispatcher
    pub action: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// IANA zone name or "local"
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub missed_strategy: MissedStrategy,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    /// Set when a missed firing was deferred to the next poll cycle
    #[serde(default)]
    pub catch_up_pending: bool,
    #[serde(default)]
    pub fire_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub last_error_category: Option<FailureCategory>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        action: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cron_expression: cron_expression.into(),
            action: action.into(),
            enabled: true,
            timezone: default_timezone(),
            missed_strategy: MissedStrategy::default(),
            last_run: None,
            next_run: None,
            catch_up_pending: false,
            fire_count: 0,
            failure_count: 0,
            last_error_category: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_missed_strategy(mut self, strategy: MissedStrategy) -> Self {
        self.missed_strategy = strategy;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Health component id used for this schedule's action failures.
    pub fn health_component(&self) -> String {
        health_component_for(&self.id)
    }
}

/// Health component id for a schedule's action.
pub fn health_component_for(schedule_id: &str) -> String {
    format!("schedule.{schedule_id}")
}

impl Record for ScheduleRecord {
    const KIND: RecordKind = RecordKind::Schedule;

    fn id(&self) -> &str {
        &self.id
    }

    fn render_body(&self) -> String {
        let fmt_time = |t: &Option<DateTime<Utc>>| {
            t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string())
        };
        format!(
            "# {}\n\n`{}` ({}) → `{}`\n\n- Enabled: {}\n- Missed firings: {}\n- Last run: {}\n- Next run: {}\n",
            self.name,
            self.cron_expression,
            self.timezone,
            self.action,
            if self.enabled { "yes" } else { "no" },
            self.missed_strategy,
            fmt_time(&self.last_run),
            fmt_time(&self.next_run),
        )
    }
}
