//! Bounded, resumable task execution.
//!
//! Callers drive a task by calling [`IterationEngine::step`] repeatedly.
//! Each step asks the reasoning collaborator for one unit of work and
//! persists exactly one outcome: the next iteration, completion or failure.
//! A step holds the task's lock file for its whole duration, and its outcome
//! is only written if the record is still at the iteration it started from.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vaultpilot_traits::{
    AuditSink, CollaboratorError, FailureCategory, Reasoner, Result, StepOutcome, StepRequest,
    VaultpilotError, validate_record_id,
};

use super::stop_hook::{NeverStop, StopHook};
use crate::audit::{AuditRecorder, ENGINE_COMPONENT};
use crate::backoff::{BackoffDecision, BackoffPolicy};
use crate::claim::{Claim, InFlight, LockDir};
use crate::health::{HealthOutcome, HealthTracker};
use crate::models::{TaskRecord, TaskStatus};
use crate::storage::TypedStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock bound on one reasoning step
    pub step_timeout_ms: u64,
    /// Extra attempts for a step that failed transiently
    pub transient_retries: u32,
    /// Re-reads allowed when a task record changed concurrently
    pub conflict_retries: u32,
    /// Ceiling used when a task is started without one
    pub default_max_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 300_000,
            transient_retries: 2,
            conflict_retries: 5,
            default_max_iterations: 10,
        }
    }
}

impl EngineConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.step_timeout_ms == 0 {
            return Err(VaultpilotError::Configuration(
                "engine.step_timeout_ms must be positive".to_string(),
            ));
        }
        if self.default_max_iterations == 0 {
            return Err(VaultpilotError::Configuration(
                "engine.default_max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Held for the duration of one step.
struct StepClaim {
    _local: Claim,
    _file: Option<File>,
}

/// Why the collaborator produced no outcome.
enum StepFailure {
    TimedOut,
    Collaborator(CollaboratorError),
}

#[derive(Clone)]
pub struct IterationEngine {
    store: TypedStore,
    audit: AuditRecorder,
    reasoner: Arc<dyn Reasoner>,
    stop_hook: Arc<dyn StopHook>,
    health: Option<HealthTracker>,
    backoff: BackoffPolicy,
    config: EngineConfig,
    in_flight: InFlight,
    step_locks: Option<LockDir>,
}

impl IterationEngine {
    pub fn new(
        store: TypedStore,
        audit: Arc<dyn AuditSink>,
        reasoner: Arc<dyn Reasoner>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            audit: AuditRecorder::new(audit, ENGINE_COMPONENT),
            reasoner,
            stop_hook: Arc::new(NeverStop),
            health: None,
            backoff: BackoffPolicy::default(),
            config,
            in_flight: InFlight::default(),
            step_locks: None,
        }
    }

    /// Claim steps through lock files in `dir`, so engines in other
    /// processes sharing the directory reject concurrent steps too.
    pub fn with_step_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.step_locks = Some(LockDir::new(dir));
        self
    }

    pub fn with_stop_hook(mut self, stop_hook: Arc<dyn StopHook>) -> Self {
        self.stop_hook = stop_hook;
        self
    }

    /// Report step failures and successes as component `engine`.
    pub fn with_health(mut self, health: HealthTracker) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a task in `Running` at iteration 0.
    pub fn start(&self, task_id: &str, prompt: &str, max_iterations: u32) -> Result<TaskRecord> {
        self.create(task_id, prompt, max_iterations, TaskStatus::Running)
    }

    /// Create a task in `Created`; it does not step until activated.
    pub fn enqueue(&self, task_id: &str, prompt: &str, max_iterations: u32) -> Result<TaskRecord> {
        self.create(task_id, prompt, max_iterations, TaskStatus::Created)
    }

    pub fn activate(&self, task_id: &str) -> Result<TaskRecord> {
        self.transition(task_id, Some(TaskStatus::Created), TaskStatus::Running, "activated")
    }

    pub fn pause(&self, task_id: &str) -> Result<TaskRecord> {
        self.transition(task_id, Some(TaskStatus::Running), TaskStatus::Paused, "paused")
    }

    /// Resume a paused task. A task whose objective was met while paused
    /// completes instead of stepping again.
    pub fn resume(&self, task_id: &str) -> Result<TaskRecord> {
        let record =
            self.transition(task_id, Some(TaskStatus::Paused), TaskStatus::Running, "resumed")?;
        if record.objective_met {
            return self.complete_met_objective(task_id);
        }
        Ok(record)
    }

    /// Cancel a non-terminal task. A step already in flight finishes but its
    /// result is discarded.
    pub fn cancel(&self, task_id: &str) -> Result<TaskRecord> {
        self.transition(task_id, None, TaskStatus::Cancelled, "cancelled")
    }

    pub fn get_task(&self, task_id: &str) -> Result<TaskRecord> {
        Ok(self.store.load::<TaskRecord>(task_id)?.record)
    }

    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>> {
        let tasks = self.store.list_records::<TaskRecord>()?;
        Ok(match status {
            Some(status) => tasks.into_iter().filter(|t| t.status == status).collect(),
            None => tasks,
        })
    }

    /// Advance a running task by one iteration.
    pub async fn step(&self, task_id: &str) -> Result<TaskRecord> {
        let _claim = self.claim(task_id)?;

        let current = self.get_task(task_id)?;
        if current.status != TaskStatus::Running {
            return Err(VaultpilotError::validation(format!(
                "task '{}' is {}; only running tasks can step",
                task_id, current.status
            )));
        }

        if let Some(reason) = self.stop_hook.stop_requested(&current) {
            return self.pause_for_stop_hook(task_id, &reason);
        }

        if current.objective_met {
            return self.complete_met_objective(task_id);
        }

        if current.limit_reached() {
            let message = format!(
                "iteration limit of {} reached without completion",
                current.max_iterations
            );
            self.fail_task(task_id, FailureCategory::LimitExceeded, &message)?;
            return Err(VaultpilotError::IterationLimitExceeded {
                task_id: task_id.to_string(),
                max_iterations: current.max_iterations,
            });
        }

        let request = StepRequest {
            task_id: task_id.to_string(),
            prompt: current.prompt.clone(),
            prior_summary: current.output_summary.clone(),
            iteration: current.iteration,
        };

        match self.perform_with_retries(&request).await {
            Ok(outcome) => self.apply_outcome(task_id, request.iteration, outcome),
            Err(StepFailure::TimedOut) => {
                let timeout = self.config.step_timeout();
                warn!(task_id, ?timeout, "Step timed out");
                self.report_health(HealthOutcome::failure(
                    FailureCategory::Transient,
                    format!("step for task '{task_id}' timed out"),
                ));
                self.audit.record(
                    "step_timeout",
                    task_id,
                    "transient",
                    Some(format!("iteration {} not persisted", current.iteration + 1)),
                );
                Err(VaultpilotError::StepTimeout {
                    task_id: task_id.to_string(),
                    timeout,
                })
            }
            Err(StepFailure::Collaborator(err)) if err.category.is_retryable() => {
                warn!(task_id, error = %err, "Step retries exhausted");
                self.report_health(HealthOutcome::failure(err.category, err.message.clone()));
                self.audit
                    .record("step_retry_exhausted", task_id, "transient", Some(err.message.clone()));
                Err(VaultpilotError::Transient(err.message))
            }
            Err(StepFailure::Collaborator(err)) => {
                self.report_health(HealthOutcome::failure(err.category, err.message.clone()));
                self.fail_task(task_id, err.category, &err.message)
            }
        }
    }

    /// Step until the task leaves `Running`. Runs in the caller's context.
    pub async fn run_until_settled(&self, task_id: &str) -> Result<TaskRecord> {
        loop {
            let record = self.step(task_id).await?;
            if record.status != TaskStatus::Running {
                return Ok(record);
            }
        }
    }

    fn create(
        &self,
        task_id: &str,
        prompt: &str,
        max_iterations: u32,
        status: TaskStatus,
    ) -> Result<TaskRecord> {
        validate_record_id(task_id)?;
        if prompt.trim().is_empty() {
            return Err(VaultpilotError::validation("prompt must not be empty"));
        }
        if max_iterations == 0 {
            return Err(VaultpilotError::validation(
                "max_iterations must be at least 1",
            ));
        }

        let record = TaskRecord::new(task_id, prompt, max_iterations, status, Utc::now());
        match self.store.create(&record) {
            Ok(_) => {}
            Err(VaultpilotError::Conflict { .. }) => {
                return Err(VaultpilotError::DuplicateTask(task_id.to_string()));
            }
            Err(err) => return Err(err),
        }

        info!(task_id, %status, max_iterations, "Task created");
        self.audit.record(
            "created",
            task_id,
            status.as_str(),
            Some(format!("max_iterations {max_iterations}")),
        );
        Ok(record)
    }

    fn claim(&self, task_id: &str) -> Result<StepClaim> {
        validate_record_id(task_id)?;
        let busy = || VaultpilotError::TaskBusy(task_id.to_string());
        let local = self.in_flight.try_claim(task_id).ok_or_else(busy)?;
        let file = match &self.step_locks {
            Some(locks) => {
                let file = locks.try_lock(task_id).map_err(|err| {
                    VaultpilotError::Storage(
                        anyhow::Error::new(err).context(format!("Failed to lock task '{task_id}'")),
                    )
                })?;
                Some(file.ok_or_else(busy)?)
            }
            None => None,
        };
        Ok(StepClaim {
            _local: local,
            _file: file,
        })
    }

    async fn perform_with_retries(
        &self,
        request: &StepRequest,
    ) -> std::result::Result<StepOutcome, StepFailure> {
        let timeout = self.config.step_timeout();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(timeout, self.reasoner.perform_step(request)).await
            {
                Err(_) => return Err(StepFailure::TimedOut),
                Ok(Ok(outcome)) => return Ok(outcome),
                Ok(Err(err)) => err,
            };

            if attempt > self.config.transient_retries {
                return Err(StepFailure::Collaborator(err));
            }
            match self.backoff.next_delay(attempt, err.category) {
                BackoffDecision::Retry(delay) => {
                    warn!(
                        task_id = %request.task_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Step failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                BackoffDecision::Escalate => return Err(StepFailure::Collaborator(err)),
            }
        }
    }

    fn apply_outcome(
        &self,
        task_id: &str,
        from_iteration: u32,
        outcome: StepOutcome,
    ) -> Result<TaskRecord> {
        let now = Utc::now();
        let update = self.store.update_with::<TaskRecord, _>(
            task_id,
            self.config.conflict_retries,
            |current| {
                if current.status.is_terminal() {
                    return Ok(None);
                }
                if current.iteration != from_iteration {
                    return Err(VaultpilotError::TaskBusy(task_id.to_string()));
                }
                let mut next = current.clone();
                next.record_step(outcome.summary.clone(), outcome.done, now)?;
                Ok(Some(next))
            },
        )
        .inspect_err(|err| {
            if matches!(err, VaultpilotError::TaskBusy(_)) {
                warn!(task_id, from_iteration, "Task advanced during step, result discarded");
            }
        })?;

        let record = update.after.record;
        if !update.changed {
            info!(task_id, status = %record.status, "Task settled during step, result discarded");
            return Ok(record);
        }

        self.report_health(HealthOutcome::Success);
        let event_kind = if record.status == TaskStatus::Completed {
            info!(task_id, iteration = record.iteration, "Task completed");
            "completed"
        } else {
            debug!(task_id, iteration = record.iteration, "Task stepped");
            "stepped"
        };
        self.audit.record(
            event_kind,
            task_id,
            record.status.as_str(),
            Some(format!("iteration {}/{}", record.iteration, record.max_iterations)),
        );
        Ok(record)
    }

    fn complete_met_objective(&self, task_id: &str) -> Result<TaskRecord> {
        let now = Utc::now();
        let update = self.store.update_with::<TaskRecord, _>(
            task_id,
            self.config.conflict_retries,
            |current| {
                if current.status != TaskStatus::Running || !current.objective_met {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.transition(TaskStatus::Completed, now)?;
                Ok(Some(next))
            },
        )?;
        let record = update.after.record;
        if update.changed {
            info!(task_id, iteration = record.iteration, "Task completed on resume");
            self.audit.record(
                "completed",
                task_id,
                record.status.as_str(),
                Some(format!("iteration {}/{}", record.iteration, record.max_iterations)),
            );
        }
        Ok(record)
    }

    fn pause_for_stop_hook(&self, task_id: &str, reason: &str) -> Result<TaskRecord> {
        let now = Utc::now();
        let update = self.store.update_with::<TaskRecord, _>(
            task_id,
            self.config.conflict_retries,
            |current| {
                if current.status != TaskStatus::Running {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.transition(TaskStatus::Paused, now)?;
                Ok(Some(next))
            },
        )?;
        if update.changed {
            info!(task_id, reason, "Stop hook paused task");
            self.audit
                .record("paused", task_id, TaskStatus::Paused.as_str(), Some(reason.to_string()));
        }
        Ok(update.after.record)
    }

    fn fail_task(
        &self,
        task_id: &str,
        category: FailureCategory,
        message: &str,
    ) -> Result<TaskRecord> {
        let now = Utc::now();
        let update = self.store.update_with::<TaskRecord, _>(
            task_id,
            self.config.conflict_retries,
            |current| {
                if current.status.is_terminal() {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.fail(category, message, now)?;
                Ok(Some(next))
            },
        )?;
        if update.changed {
            warn!(task_id, %category, error = message, "Task failed");
            self.audit.record(
                "failed",
                task_id,
                TaskStatus::Failed.as_str(),
                Some(format!("{category}: {message}")),
            );
        }
        Ok(update.after.record)
    }

    fn transition(
        &self,
        task_id: &str,
        required: Option<TaskStatus>,
        next_status: TaskStatus,
        event_kind: &str,
    ) -> Result<TaskRecord> {
        let now = Utc::now();
        let update = self.store.update_with::<TaskRecord, _>(
            task_id,
            self.config.conflict_retries,
            |current| {
                if let Some(required) = required
                    && current.status != required
                {
                    return Err(VaultpilotError::validation(format!(
                        "task '{}' is {}; {} requires {}",
                        task_id, current.status, event_kind, required
                    )));
                }
                let mut next = current.clone();
                next.transition(next_status, now)?;
                Ok(Some(next))
            },
        )?;

        info!(task_id, prior = %update.before.status, status = %next_status, "Task {}", event_kind);
        self.audit.record(
            event_kind,
            task_id,
            next_status.as_str(),
            Some(format!("{} -> {}", update.before.status, next_status)),
        );
        Ok(update.after.record)
    }

    fn report_health(&self, outcome: HealthOutcome) {
        if let Some(health) = &self.health
            && let Err(err) = health.report(ENGINE_COMPONENT, outcome, Utc::now())
        {
            warn!(error = %err, "Failed to report engine health");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::SUPERVISOR_COMPONENT;
    use crate::backoff::BackoffConfig;
    use crate::engine::stop_hook::FlagStopHook;
    use crate::health::HealthConfig;
    use crate::models::HealthStatus;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Notify;
    use vaultpilot_storage::{JsonlAuditLog, VaultStore};

    type Scripted = std::result::Result<StepOutcome, CollaboratorError>;

    /// Replays queued results; once empty, reports progress forever.
    #[derive(Default)]
    struct ScriptedReasoner {
        script: Mutex<VecDeque<Scripted>>,
        calls: AtomicU32,
    }

    impl ScriptedReasoner {
        fn with(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Reasoner for ScriptedReasoner {
        async fn perform_step(
            &self,
            request: &StepRequest,
        ) -> std::result::Result<StepOutcome, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().pop_front().unwrap_or_else(|| {
                Ok(StepOutcome::progress(format!(
                    "progress after {}",
                    request.iteration + 1
                )))
            })
        }
    }

    /// Blocks inside the step until released.
    struct GatedReasoner {
        entered: Notify,
        release: Notify,
        done: bool,
    }

    fn gated(done: bool) -> Arc<GatedReasoner> {
        Arc::new(GatedReasoner {
            entered: Notify::new(),
            release: Notify::new(),
            done,
        })
    }

    #[async_trait]
    impl Reasoner for GatedReasoner {
        async fn perform_step(
            &self,
            _request: &StepRequest,
        ) -> std::result::Result<StepOutcome, CollaboratorError> {
            self.entered.notify_one();
            self.release.notified().await;
            if self.done {
                Ok(StepOutcome::finished("gated"))
            } else {
                Ok(StepOutcome::progress("gated"))
            }
        }
    }

    /// An engine with its own store handle on `dir`, as another process
    /// would open it.
    fn engine_on(dir: &std::path::Path, reasoner: Arc<dyn Reasoner>, locked: bool) -> IterationEngine {
        let store = TypedStore::new(Arc::new(VaultStore::open(dir).unwrap()));
        let sink: Arc<dyn AuditSink> = Arc::new(JsonlAuditLog::open_in_vault(dir).unwrap());
        let engine = IterationEngine::new(store, sink, reasoner, EngineConfig::default());
        if locked {
            engine.with_step_lock_dir(dir.join(".locks"))
        } else {
            engine
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: TypedStore,
        health: HealthTracker,
        engine: IterationEngine,
    }

    fn fixture(reasoner: Arc<dyn Reasoner>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = TypedStore::new(Arc::new(VaultStore::open(dir.path()).unwrap()));
        let sink: Arc<dyn AuditSink> = Arc::new(JsonlAuditLog::open_in_vault(dir.path()).unwrap());
        let health = HealthTracker::new(
            store.clone(),
            AuditRecorder::new(sink.clone(), SUPERVISOR_COMPONENT),
            HealthConfig::default(),
        );
        let config = EngineConfig {
            step_timeout_ms: 200,
            ..EngineConfig::default()
        };
        let engine = IterationEngine::new(store.clone(), sink, reasoner, config)
            .with_health(health.clone())
            .with_backoff(BackoffPolicy::new(BackoffConfig {
                base_delay_ms: 1,
                multiplier: 2.0,
                max_delay_ms: 10,
                jitter_factor: 0.0,
            }));
        Fixture {
            _dir: dir,
            store,
            health,
            engine,
        }
    }

    #[tokio::test]
    async fn limit_exceeded_after_max_iterations() {
        let f = fixture(ScriptedReasoner::with(vec![]));
        f.engine.start("t1", "draft the briefing", 3).unwrap();
        for expected in 1..=3 {
            let record = f.engine.step("t1").await.unwrap();
            assert_eq!(record.iteration, expected);
            assert_eq!(record.status, TaskStatus::Running);
        }

        let err = f.engine.step("t1").await.unwrap_err();
        assert!(matches!(
            err,
            VaultpilotError::IterationLimitExceeded { max_iterations: 3, .. }
        ));
        let record = f.engine.get_task("t1").unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.failure_category, Some(FailureCategory::LimitExceeded));
        assert_eq!(record.iteration, 3);
        assert_eq!(record.output_summary, "progress after 3");
    }

    #[tokio::test]
    async fn done_completes_and_counts_the_step() {
        let f = fixture(ScriptedReasoner::with(vec![
            Ok(StepOutcome::progress("half")),
            Ok(StepOutcome::finished("all done")),
        ]));
        f.engine.start("t1", "p", 5).unwrap();
        let record = f.engine.run_until_settled("t1").await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.iteration, 2);
        assert_eq!(record.output_summary, "all done");
        assert_eq!(
            f.health.get(ENGINE_COMPONENT).unwrap().unwrap().status,
            HealthStatus::Healthy
        );
    }

    #[tokio::test]
    async fn step_rejects_non_running_tasks() {
        let f = fixture(ScriptedReasoner::with(vec![Ok(StepOutcome::finished("done"))]));
        f.engine.enqueue("created", "p", 3).unwrap();
        f.engine.start("paused", "p", 3).unwrap();
        f.engine.pause("paused").unwrap();
        f.engine.start("done", "p", 3).unwrap();
        f.engine.step("done").await.unwrap();
        f.engine.start("cancelled", "p", 3).unwrap();
        f.engine.cancel("cancelled").unwrap();

        for id in ["created", "paused", "done", "cancelled"] {
            let before = f.engine.get_task(id).unwrap();
            let err = f.engine.step(id).await.unwrap_err();
            assert!(matches!(err, VaultpilotError::Validation(_)), "{id}: {err}");
            assert_eq!(f.engine.get_task(id).unwrap(), before);
        }
    }

    #[tokio::test]
    async fn lifecycle_calls_enforce_state_machine() {
        let f = fixture(ScriptedReasoner::with(vec![]));
        f.engine.enqueue("t1", "p", 3).unwrap();
        assert!(f.engine.resume("t1").is_err());
        assert!(f.engine.pause("t1").is_err());
        assert_eq!(f.engine.activate("t1").unwrap().status, TaskStatus::Running);
        assert_eq!(f.engine.pause("t1").unwrap().status, TaskStatus::Paused);
        assert_eq!(f.engine.resume("t1").unwrap().status, TaskStatus::Running);
        assert_eq!(f.engine.cancel("t1").unwrap().status, TaskStatus::Cancelled);
        assert!(f.engine.cancel("t1").is_err());
        assert!(f.engine.resume("t1").is_err());
    }

    #[tokio::test]
    async fn duplicate_and_invalid_starts_are_rejected() {
        let f = fixture(ScriptedReasoner::with(vec![]));
        f.engine.start("t1", "p", 3).unwrap();
        assert!(matches!(
            f.engine.start("t1", "other", 3).unwrap_err(),
            VaultpilotError::DuplicateTask(_)
        ));
        assert!(matches!(
            f.engine.start("t2", "p", 0).unwrap_err(),
            VaultpilotError::Validation(_)
        ));
        assert!(matches!(
            f.engine.start("../escape", "p", 3).unwrap_err(),
            VaultpilotError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn fatal_collaborator_error_fails_task_keeping_summary() {
        let f = fixture(ScriptedReasoner::with(vec![
            Ok(StepOutcome::progress("good progress")),
            Err(CollaboratorError::configuration("bad api key")),
        ]));
        f.engine.start("t1", "p", 5).unwrap();
        f.engine.step("t1").await.unwrap();
        let record = f.engine.step("t1").await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.failure_category, Some(FailureCategory::Configuration));
        assert_eq!(record.last_error.as_deref(), Some("bad api key"));
        assert_eq!(record.output_summary, "good progress");
        assert_eq!(record.iteration, 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_within_ceiling() {
        let reasoner = ScriptedReasoner::with(vec![
            Err(CollaboratorError::transient("rate limited")),
            Err(CollaboratorError::transient("rate limited")),
            Ok(StepOutcome::progress("through")),
        ]);
        let f = fixture(reasoner.clone());
        f.engine.start("t1", "p", 5).unwrap();
        let record = f.engine.step("t1").await.unwrap();
        assert_eq!(record.iteration, 1);
        assert_eq!(reasoner.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_transient_retries_leave_record_untouched() {
        let reasoner = ScriptedReasoner::with(vec![
            Err(CollaboratorError::transient("down")),
            Err(CollaboratorError::transient("down")),
            Err(CollaboratorError::transient("down")),
        ]);
        let f = fixture(reasoner.clone());
        let created = f.engine.start("t1", "p", 5).unwrap();
        let err = f.engine.step("t1").await.unwrap_err();
        assert!(matches!(err, VaultpilotError::Transient(_)));
        assert_eq!(reasoner.calls(), 3);
        assert_eq!(f.engine.get_task("t1").unwrap(), created);
    }

    #[tokio::test]
    async fn timeout_is_transient_and_keeps_last_iteration() {
        let f = fixture(gated(false));
        let created = f.engine.start("t1", "p", 5).unwrap();
        let err = f.engine.step("t1").await.unwrap_err();
        assert!(matches!(err, VaultpilotError::StepTimeout { .. }));
        assert_eq!(f.engine.get_task("t1").unwrap(), created);

        let health = f.health.get(ENGINE_COMPONENT).unwrap().unwrap();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.last_error_category, Some(FailureCategory::Transient));
    }

    #[tokio::test]
    async fn concurrent_step_is_rejected_and_cancel_discards_result() {
        let gate = gated(false);
        let dir = TempDir::new().unwrap();
        let store = TypedStore::new(Arc::new(VaultStore::open(dir.path()).unwrap()));
        let sink: Arc<dyn AuditSink> = Arc::new(JsonlAuditLog::open_in_vault(dir.path()).unwrap());
        let engine = IterationEngine::new(store, sink, gate.clone(), EngineConfig::default());
        engine.start("t1", "p", 5).unwrap();

        let background = engine.clone();
        let handle = tokio::spawn(async move { background.step("t1").await });
        gate.entered.notified().await;

        assert!(matches!(
            engine.step("t1").await.unwrap_err(),
            VaultpilotError::TaskBusy(_)
        ));
        engine.cancel("t1").unwrap();
        gate.release.notify_one();

        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(record.iteration, 0);
    }

    #[tokio::test]
    async fn stop_hook_pauses_between_steps() {
        let reasoner = ScriptedReasoner::with(vec![]);
        let f = fixture(reasoner.clone());
        let hook = FlagStopHook::new();
        let engine = f.engine.clone().with_stop_hook(Arc::new(hook.clone()));
        engine.start("t1", "p", 5).unwrap();
        engine.step("t1").await.unwrap();

        hook.request_stop();
        let paused = engine.step("t1").await.unwrap();
        assert_eq!(paused.status, TaskStatus::Paused);
        assert_eq!(paused.iteration, 1);
        assert_eq!(reasoner.calls(), 1);

        hook.clear();
        engine.resume("t1").unwrap();
        let record = engine.step("t1").await.unwrap();
        assert_eq!(record.iteration, 2);
        assert_eq!(f.store.load::<TaskRecord>("t1").unwrap().record, record);
    }

    #[tokio::test]
    async fn step_lock_rejects_engine_on_another_store_handle() {
        let dir = TempDir::new().unwrap();
        let gate = gated(false);
        let first = engine_on(dir.path(), gate.clone(), true);
        let second = engine_on(dir.path(), ScriptedReasoner::with(vec![]), true);
        first.start("t1", "p", 5).unwrap();

        let background = first.clone();
        let handle = tokio::spawn(async move { background.step("t1").await });
        gate.entered.notified().await;

        assert!(matches!(
            second.step("t1").await.unwrap_err(),
            VaultpilotError::TaskBusy(_)
        ));
        gate.release.notify_one();

        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.iteration, 1);
        assert_eq!(record.output_summary, "gated");

        // The lock is released with the step.
        let record = second.step("t1").await.unwrap();
        assert_eq!(record.iteration, 2);
    }

    #[tokio::test]
    async fn outcome_built_on_a_superseded_iteration_is_discarded() {
        let dir = TempDir::new().unwrap();
        let gate = gated(false);
        let slow = engine_on(dir.path(), gate.clone(), false);
        let fast = engine_on(dir.path(), ScriptedReasoner::with(vec![]), false);
        slow.start("t1", "p", 5).unwrap();

        let background = slow.clone();
        let handle = tokio::spawn(async move { background.step("t1").await });
        gate.entered.notified().await;

        let advanced = fast.step("t1").await.unwrap();
        assert_eq!(advanced.iteration, 1);
        gate.release.notify_one();

        assert!(matches!(
            handle.await.unwrap().unwrap_err(),
            VaultpilotError::TaskBusy(_)
        ));
        let record = fast.get_task("t1").unwrap();
        assert_eq!(record.iteration, 1);
        assert_eq!(record.output_summary, "progress after 1");
    }

    #[tokio::test]
    async fn done_while_paused_completes_on_resume() {
        let gate = gated(true);
        let f = fixture(gate.clone());
        let engine = IterationEngine {
            config: EngineConfig::default(),
            ..f.engine.clone()
        };
        engine.start("t1", "p", 5).unwrap();

        let background = engine.clone();
        let handle = tokio::spawn(async move { background.step("t1").await });
        gate.entered.notified().await;
        engine.pause("t1").unwrap();
        gate.release.notify_one();

        let paused = handle.await.unwrap().unwrap();
        assert_eq!(paused.status, TaskStatus::Paused);
        assert_eq!(paused.iteration, 1);
        assert!(paused.objective_met);

        let resumed = engine.resume("t1").unwrap();
        assert_eq!(resumed.status, TaskStatus::Completed);
        assert_eq!(resumed.iteration, 1);
        assert_eq!(resumed.output_summary, "gated");
    }
}
