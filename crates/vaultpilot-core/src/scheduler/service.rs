//! Evaluates schedule records against the clock and fires due actions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vaultpilot_traits::{
    ActionDispatcher, ActionReceipt, ActionRequest, AuditSink, CollaboratorError,
    FailureCategory, RecordKind, Result, VaultpilotError, validate_record_id,
};

use super::cron::{CronError, CronExpr, ScheduleTimezone};
use crate::action::check_schedule_action;
use crate::audit::{AuditRecorder, SCHEDULER_COMPONENT};
use crate::backoff::{BackoffDecision, BackoffPolicy};
use crate::claim::InFlight;
use crate::health::{HealthOutcome, HealthTracker};
use crate::models::{HealthRecord, HealthStatus, MissedStrategy, ScheduleRecord};
use crate::storage::TypedStore;

/// Upper bound on missed occurrences counted for one schedule.
const MAX_COUNTED_OCCURRENCES: u32 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the daemon evaluates schedules
    pub poll_interval_secs: u64,
    /// Lateness up to which a single elapsed occurrence still fires on time
    pub misfire_grace_secs: u64,
    /// Extra attempts for an action that failed transiently
    pub action_retries: u32,
    /// Re-reads allowed when a schedule record changed concurrently
    pub conflict_retries: u32,
    /// Wall-clock bound on one `exec:` action
    pub action_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            misfire_grace_secs: 900,
            action_retries: 2,
            conflict_retries: 5,
            action_timeout_secs: 120,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }

    pub fn action_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.action_timeout_secs)
    }

    pub fn misfire_grace(&self) -> Duration {
        Duration::seconds(self.misfire_grace_secs.min(i64::MAX as u64) as i64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(VaultpilotError::Configuration(
                "scheduler.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.action_timeout_secs == 0 {
            return Err(VaultpilotError::Configuration(
                "scheduler.action_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// What one evaluation pass decided for a schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Due now; `catch_up` marks a firing that makes up for missed windows
    Fire {
        schedule: ScheduleRecord,
        catch_up: bool,
        missed: u32,
    },
    /// Missed occurrences dropped without firing
    Skip {
        schedule: ScheduleRecord,
        missed: u32,
        next_run: Option<DateTime<Utc>>,
    },
    /// Missed occurrences collapse into one firing on the next poll
    Defer {
        schedule: ScheduleRecord,
        missed: u32,
        next_run: Option<DateTime<Utc>>,
    },
    /// Not eligible to fire, but `next_run` is stale and gets recomputed
    Refresh {
        schedule: ScheduleRecord,
        next_run: Option<DateTime<Utc>>,
    },
    /// Expression or timezone no longer parses
    Invalid {
        schedule: ScheduleRecord,
        error: String,
    },
}

impl Decision {
    pub fn schedule(&self) -> &ScheduleRecord {
        match self {
            Decision::Fire { schedule, .. }
            | Decision::Skip { schedule, .. }
            | Decision::Defer { schedule, .. }
            | Decision::Refresh { schedule, .. }
            | Decision::Invalid { schedule, .. } => schedule,
        }
    }
}

/// Outcome of invoking a schedule's action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FireResult {
    Ok {
        detail: String,
    },
    Error {
        category: FailureCategory,
        message: String,
    },
}

impl FireResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, FireResult::Ok { .. })
    }
}

impl From<std::result::Result<ActionReceipt, CollaboratorError>> for FireResult {
    fn from(result: std::result::Result<ActionReceipt, CollaboratorError>) -> Self {
        match result {
            Ok(receipt) => FireResult::Ok {
                detail: receipt.detail,
            },
            Err(err) => FireResult::Error {
                category: err.category,
                message: err.message,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireOutcome {
    pub schedule_id: String,
    pub fired_at: DateTime<Utc>,
    pub catch_up: bool,
    pub missed: u32,
    pub next_run: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub result: FireResult,
}

/// Everything one [`Scheduler::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub fired: Vec<FireOutcome>,
    pub skipped: Vec<String>,
    pub deferred: Vec<String>,
    pub refreshed: Vec<String>,
    pub invalid: Vec<String>,
    /// Schedules whose decision could not be applied, with the error
    pub errors: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct Scheduler {
    store: TypedStore,
    audit: AuditRecorder,
    dispatcher: Arc<dyn ActionDispatcher>,
    health: Option<HealthTracker>,
    backoff: BackoffPolicy,
    config: SchedulerConfig,
    firing: InFlight,
}

fn parse_schedule(schedule: &ScheduleRecord) -> std::result::Result<(CronExpr, ScheduleTimezone), CronError> {
    Ok((
        CronExpr::parse(&schedule.cron_expression)?,
        ScheduleTimezone::parse(&schedule.timezone)?,
    ))
}

impl Scheduler {
    pub fn new(
        store: TypedStore,
        audit: Arc<dyn AuditSink>,
        dispatcher: Arc<dyn ActionDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            audit: AuditRecorder::new(audit, SCHEDULER_COMPONENT),
            dispatcher,
            health: None,
            backoff: BackoffPolicy::default(),
            config,
            firing: InFlight::default(),
        }
    }

    /// Report action outcomes as component `schedule.<id>` and skip
    /// schedules whose component is quarantined.
    pub fn with_health(mut self, health: HealthTracker) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn get(&self, schedule_id: &str) -> Result<ScheduleRecord> {
        Ok(self.store.load::<ScheduleRecord>(schedule_id)?.record)
    }

    pub fn list(&self) -> Result<Vec<ScheduleRecord>> {
        self.store.list_records()
    }

    /// Validate and store a new schedule with `next_run` computed from `now`.
    pub fn add(&self, schedule: ScheduleRecord, now: DateTime<Utc>) -> Result<ScheduleRecord> {
        validate_record_id(&schedule.id)?;
        if schedule.action.trim().is_empty() {
            return Err(VaultpilotError::validation("action must not be empty"));
        }
        check_schedule_action(&schedule.id, &schedule.action)?;
        let (expr, tz) =
            parse_schedule(&schedule).map_err(|e| VaultpilotError::validation(e.to_string()))?;
        let next_run = tz.next_at_or_after(&expr, now).ok_or_else(|| {
            VaultpilotError::validation(format!(
                "cron expression '{}' never fires",
                schedule.cron_expression
            ))
        })?;

        let mut schedule = schedule;
        schedule.next_run = Some(next_run);
        schedule.catch_up_pending = false;
        schedule.created_at = now;
        schedule.updated_at = now;
        match self.store.create(&schedule) {
            Ok(_) => {}
            Err(VaultpilotError::Conflict { .. }) => {
                return Err(VaultpilotError::validation(format!(
                    "schedule '{}' already exists",
                    schedule.id
                )));
            }
            Err(err) => return Err(err),
        }

        info!(schedule_id = %schedule.id, cron = %schedule.cron_expression, %next_run, "Schedule added");
        self.audit.record(
            "added",
            &schedule.id,
            "ok",
            Some(format!("next run {}", next_run.to_rfc3339())),
        );
        Ok(schedule)
    }

    /// Enable or disable a schedule. Enabling recomputes `next_run` from
    /// `now` so no backlog fires.
    pub fn set_enabled(
        &self,
        schedule_id: &str,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<ScheduleRecord> {
        let update = self.store.update_with::<ScheduleRecord, _>(
            schedule_id,
            self.config.conflict_retries,
            |current| {
                let mut next = current.clone();
                next.enabled = enabled;
                next.updated_at = now;
                if enabled {
                    next.catch_up_pending = false;
                    if let Ok((expr, tz)) = parse_schedule(current) {
                        next.next_run = tz.next_at_or_after(&expr, now);
                    }
                }
                Ok(Some(next))
            },
        )?;
        let event_kind = if enabled { "enabled" } else { "disabled" };
        info!(schedule_id, "Schedule {}", event_kind);
        self.audit.record(event_kind, schedule_id, "ok", None);
        Ok(update.after.record)
    }

    pub fn remove(&self, schedule_id: &str) -> Result<()> {
        if !self.store.delete::<ScheduleRecord>(schedule_id)? {
            return Err(VaultpilotError::not_found(RecordKind::Schedule, schedule_id));
        }
        info!(schedule_id, "Schedule removed");
        self.audit.record("removed", schedule_id, "ok", None);
        Ok(())
    }

    /// Upcoming firings of a stored schedule.
    pub fn preview(
        &self,
        schedule_id: &str,
        after: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>> {
        let schedule = self.get(schedule_id)?;
        let (expr, tz) =
            parse_schedule(&schedule).map_err(|e| VaultpilotError::Configuration(e.to_string()))?;
        Ok(tz.preview(&expr, after, count))
    }

    /// Decide what to do with every schedule at `now`. Reads only.
    pub fn plan(&self, now: DateTime<Utc>) -> Result<Vec<Decision>> {
        let quarantined = self.quarantined_components()?;
        let decisions = self
            .list()?
            .into_iter()
            .filter_map(|schedule| {
                let quarantined = quarantined.contains(&schedule.health_component());
                self.decide(schedule, now, quarantined)
            })
            .collect();
        Ok(decisions)
    }

    /// Schedules due at `now`.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleRecord>> {
        Ok(self
            .plan(now)?
            .into_iter()
            .filter_map(|decision| match decision {
                Decision::Fire { schedule, .. } => Some(schedule),
                _ => None,
            })
            .collect())
    }

    fn quarantined_components(&self) -> Result<HashSet<String>> {
        if self.health.is_none() {
            return Ok(HashSet::new());
        }
        Ok(self
            .store
            .list_records::<HealthRecord>()?
            .into_iter()
            .filter(|h| h.status == HealthStatus::Quarantined)
            .map(|h| h.component_id)
            .collect())
    }

    fn decide(
        &self,
        schedule: ScheduleRecord,
        now: DateTime<Utc>,
        quarantined: bool,
    ) -> Option<Decision> {
        let stale = schedule.next_run.is_none_or(|next| next < now);

        if !schedule.enabled || quarantined {
            if !stale {
                return None;
            }
            let (expr, tz) = parse_schedule(&schedule).ok()?;
            let next_run = tz.next_at_or_after(&expr, now);
            return Some(Decision::Refresh { schedule, next_run });
        }

        let (expr, tz) = match parse_schedule(&schedule) {
            Ok(parsed) => parsed,
            Err(err) => {
                return Some(Decision::Invalid {
                    error: err.to_string(),
                    schedule,
                });
            }
        };

        if schedule.catch_up_pending {
            return Some(Decision::Fire {
                schedule,
                catch_up: true,
                missed: 0,
            });
        }

        let Some(next_run) = schedule.next_run else {
            let next_run = tz.next_at_or_after(&expr, now);
            return Some(Decision::Refresh { schedule, next_run });
        };
        if next_run > now {
            return None;
        }

        // next_run itself is the first elapsed occurrence.
        let mut elapsed = 1u32;
        let mut cursor = next_run;
        while elapsed < MAX_COUNTED_OCCURRENCES {
            match tz.next_after(&expr, cursor) {
                Some(next) if next <= now => {
                    elapsed += 1;
                    cursor = next;
                }
                _ => break,
            }
        }

        if elapsed == 1 && now - next_run <= self.config.misfire_grace() {
            return Some(Decision::Fire {
                schedule,
                catch_up: false,
                missed: 0,
            });
        }

        let missed = elapsed;
        Some(match schedule.missed_strategy {
            MissedStrategy::Skip => Decision::Skip {
                next_run: tz.next_after(&expr, now),
                schedule,
                missed,
            },
            MissedStrategy::RunImmediately => Decision::Fire {
                schedule,
                catch_up: true,
                missed,
            },
            MissedStrategy::RunAtNextWindow => Decision::Defer {
                next_run: tz.next_after(&expr, now),
                schedule,
                missed,
            },
        })
    }

    /// Evaluate and apply every decision at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        for decision in self.plan(now)? {
            let schedule_id = decision.schedule().id.clone();
            if let Err(err) = self.apply(decision, now, &mut report).await {
                error!(schedule_id = %schedule_id, error = %err, "Failed to apply schedule decision");
                report.errors.push((schedule_id, err.to_string()));
            }
        }
        Ok(report)
    }

    async fn apply(
        &self,
        decision: Decision,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        match decision {
            Decision::Fire {
                schedule,
                catch_up,
                missed,
            } => {
                if let Some(outcome) = self.fire_with(&schedule, now, catch_up, missed, false).await? {
                    report.fired.push(outcome);
                }
            }
            Decision::Skip {
                schedule,
                missed,
                next_run,
            } => {
                if self.advance(&schedule, now, next_run, false)? {
                    info!(schedule_id = %schedule.id, missed, "Missed firings skipped");
                    self.audit.record(
                        "skipped",
                        &schedule.id,
                        "ok",
                        Some(format!("{missed} missed occurrence(s) dropped")),
                    );
                    report.skipped.push(schedule.id);
                }
            }
            Decision::Defer {
                schedule,
                missed,
                next_run,
            } => {
                if self.advance(&schedule, now, next_run, true)? {
                    info!(schedule_id = %schedule.id, missed, "Missed firing deferred to next poll");
                    self.audit.record(
                        "deferred",
                        &schedule.id,
                        "ok",
                        Some(format!("{missed} missed occurrence(s) collapse into one firing")),
                    );
                    report.deferred.push(schedule.id);
                }
            }
            Decision::Refresh { schedule, next_run } => {
                if self.advance(&schedule, now, next_run, false)? {
                    debug!(schedule_id = %schedule.id, ?next_run, "next_run refreshed");
                    report.refreshed.push(schedule.id);
                }
            }
            Decision::Invalid { schedule, error } => {
                error!(schedule_id = %schedule.id, error = %error, "Schedule definition is invalid");
                self.report_health(
                    &schedule,
                    HealthOutcome::failure(FailureCategory::Configuration, error),
                    now,
                );
                report.invalid.push(schedule.id);
            }
        }
        Ok(())
    }

    /// Move `next_run` forward if the record still matches the snapshot the
    /// decision was made on. Returns whether anything was written.
    fn advance(
        &self,
        snapshot: &ScheduleRecord,
        now: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
        catch_up_pending: bool,
    ) -> Result<bool> {
        let update = self.store.update_with::<ScheduleRecord, _>(
            &snapshot.id,
            self.config.conflict_retries,
            |current| {
                if current.next_run != snapshot.next_run
                    || current.catch_up_pending != snapshot.catch_up_pending
                {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.next_run = next_run;
                next.catch_up_pending = catch_up_pending;
                next.updated_at = now;
                Ok(Some(next))
            },
        )?;
        Ok(update.changed)
    }

    /// Fire a due schedule. Returns `None` if the firing was already claimed
    /// by another evaluation.
    pub async fn fire(
        &self,
        schedule: &ScheduleRecord,
        now: DateTime<Utc>,
        catch_up: bool,
    ) -> Result<Option<FireOutcome>> {
        self.fire_with(schedule, now, catch_up, 0, false).await
    }

    /// Fire a schedule immediately, regardless of its due time.
    pub async fn run_now(&self, schedule_id: &str, now: DateTime<Utc>) -> Result<FireOutcome> {
        let schedule = self.get(schedule_id)?;
        self.fire_with(&schedule, now, false, 0, true)
            .await?
            .ok_or_else(|| VaultpilotError::Conflict {
                kind: RecordKind::Schedule,
                id: schedule_id.to_string(),
            })
    }

    async fn fire_with(
        &self,
        snapshot: &ScheduleRecord,
        now: DateTime<Utc>,
        catch_up: bool,
        missed: u32,
        force: bool,
    ) -> Result<Option<FireOutcome>> {
        let Some(_claim) = self.firing.try_claim(&snapshot.id) else {
            debug!(schedule_id = %snapshot.id, "Firing already in progress");
            return Ok(None);
        };
        let (expr, tz) =
            parse_schedule(snapshot).map_err(|e| VaultpilotError::Configuration(e.to_string()))?;

        // Persist last_run/next_run before invoking, so no other evaluation
        // can fire the same occurrence.
        let claimed = self.store.update_with::<ScheduleRecord, _>(
            &snapshot.id,
            self.config.conflict_retries,
            |current| {
                let unchanged = current.next_run == snapshot.next_run
                    && current.catch_up_pending == snapshot.catch_up_pending
                    && current.enabled;
                if !force && !unchanged {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.last_run = Some(now);
                next.next_run = tz.next_after(&expr, now);
                next.catch_up_pending = false;
                next.fire_count = current.fire_count.saturating_add(1);
                next.updated_at = now;
                Ok(Some(next))
            },
        )?;
        if !claimed.changed {
            debug!(schedule_id = %snapshot.id, "Firing claimed elsewhere");
            return Ok(None);
        }
        let schedule = claimed.after.record;

        let request = ActionRequest {
            schedule_id: schedule.id.clone(),
            action: schedule.action.clone(),
            fired_at: now,
            catch_up,
        };
        let result = FireResult::from(self.invoke_with_retries(&request).await);

        match &result {
            FireResult::Ok { detail } => {
                info!(schedule_id = %schedule.id, catch_up, missed, detail = %detail, "Schedule fired");
                self.report_health(&schedule, HealthOutcome::Success, now);
            }
            FireResult::Error { category, message } => {
                warn!(schedule_id = %schedule.id, %category, error = %message, "Schedule action failed");
                self.report_health(&schedule, HealthOutcome::failure(*category, message.clone()), now);
            }
        }
        self.record_result(&schedule.id, &result, now)?;

        let event_kind = match (&result, catch_up) {
            (FireResult::Error { .. }, _) => "action_failed",
            (FireResult::Ok { .. }, true) => "catch_up",
            (FireResult::Ok { .. }, false) => "fired",
        };
        let detail = match &result {
            FireResult::Ok { detail } => detail.clone(),
            FireResult::Error { category, message } => format!("{category}: {message}"),
        };
        self.audit.record(
            event_kind,
            &schedule.id,
            if result.is_ok() { "ok" } else { "error" },
            Some(detail),
        );

        Ok(Some(FireOutcome {
            schedule_id: schedule.id,
            fired_at: now,
            catch_up,
            missed,
            next_run: schedule.next_run,
            result,
        }))
    }

    async fn invoke_with_retries(
        &self,
        request: &ActionRequest,
    ) -> std::result::Result<ActionReceipt, CollaboratorError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match self.dispatcher.invoke(request).await {
                Ok(receipt) => return Ok(receipt),
                Err(err) => err,
            };
            if attempt > self.config.action_retries {
                return Err(err);
            }
            match self.backoff.next_delay(attempt, err.category) {
                BackoffDecision::Retry(delay) => {
                    warn!(
                        schedule_id = %request.schedule_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Action failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                BackoffDecision::Escalate => return Err(err),
            }
        }
    }

    fn record_result(&self, schedule_id: &str, result: &FireResult, now: DateTime<Utc>) -> Result<()> {
        self.store.update_with::<ScheduleRecord, _>(
            schedule_id,
            self.config.conflict_retries,
            |current| {
                let mut next = current.clone();
                match result {
                    FireResult::Ok { .. } => {
                        if current.last_error.is_none() && current.last_error_category.is_none() {
                            return Ok(None);
                        }
                        next.last_error = None;
                        next.last_error_category = None;
                    }
                    FireResult::Error { category, message } => {
                        next.failure_count = current.failure_count.saturating_add(1);
                        next.last_error_category = Some(*category);
                        next.last_error = Some(message.clone());
                    }
                }
                next.updated_at = now;
                Ok(Some(next))
            },
        )?;
        Ok(())
    }

    fn report_health(&self, schedule: &ScheduleRecord, outcome: HealthOutcome, now: DateTime<Utc>) {
        if let Some(health) = &self.health
            && let Err(err) = health.report(&schedule.health_component(), outcome, now)
        {
            warn!(schedule_id = %schedule.id, error = %err, "Failed to report schedule health");
        }
    }
}
