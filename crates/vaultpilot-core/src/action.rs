//! Built-in action descriptors schedules can fire.
//!
//! - `task:<prompt>` starts a task named `<schedule-id>-<yyyymmddhhmm>`
//! - `exec:<command line>` runs a shell command

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};
use vaultpilot_traits::{
    ActionDispatcher, ActionReceipt, ActionRequest, CollaboratorError, ErrorClass, MAX_ID_LEN,
    VaultpilotError,
};

use crate::engine::IterationEngine;

const TASK_PREFIX: &str = "task:";
const EXEC_PREFIX: &str = "exec:";

/// Longest stdout excerpt kept in a receipt.
const DETAIL_LIMIT: usize = 200;

/// Length of the `-<yyyymmddhhmm>` suffix on task ids started by `task:`.
const TASK_ID_SUFFIX_LEN: usize = 13;

const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(120);

pub struct BuiltinActionDispatcher {
    engine: IterationEngine,
    max_iterations: u32,
    working_dir: Option<PathBuf>,
    exec_timeout: Duration,
}

impl BuiltinActionDispatcher {
    pub fn new(engine: IterationEngine) -> Self {
        let max_iterations = engine.config().default_max_iterations;
        Self {
            engine,
            max_iterations,
            working_dir: None,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    /// Bound on one `exec:` command; the process is killed when it elapses.
    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    /// Directory `exec:` commands run in.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn start_task(
        &self,
        request: &ActionRequest,
        prompt: &str,
    ) -> Result<ActionReceipt, CollaboratorError> {
        let task_id = format!(
            "{}-{}",
            request.schedule_id,
            request.fired_at.format("%Y%m%d%H%M")
        );
        match self.engine.start(&task_id, prompt, self.max_iterations) {
            Ok(task) => Ok(ActionReceipt::new(format!("started task {}", task.task_id))),
            // The same minute fired twice (e.g. a manual run); the task exists.
            Err(VaultpilotError::DuplicateTask(_)) => {
                Ok(ActionReceipt::new(format!("task {task_id} already started")))
            }
            Err(err) => Err(collaborator_error(err)),
        }
    }

    async fn exec(&self, command_line: &str) -> Result<ActionReceipt, CollaboratorError> {
        let mut cmd = shell_command(command_line);
        if let Some(ref cwd) = self.working_dir {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.exec_timeout, cmd.output()).await {
            Ok(output) => output.map_err(|e| {
                error!(command = command_line, error = %e, "Failed to spawn action command");
                CollaboratorError::configuration(format!("Failed to spawn '{command_line}': {e}"))
            })?,
            Err(_) => {
                warn!(command = command_line, timeout = ?self.exec_timeout, "Action command timed out");
                return Err(CollaboratorError::transient(format!(
                    "'{}' timed out after {}s",
                    command_line,
                    self.exec_timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::transient(format!(
                "'{}' exited with code {}: {}",
                command_line,
                exit_code,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let excerpt: String = stdout.trim().chars().take(DETAIL_LIMIT).collect();
        info!(command = command_line, "Action command finished");
        Ok(ActionReceipt::new(if excerpt.is_empty() {
            "exit 0".to_string()
        } else {
            excerpt
        }))
    }
}

/// Reject a `task:` schedule whose id leaves no room for the task id suffix.
pub fn check_schedule_action(schedule_id: &str, action: &str) -> Result<(), VaultpilotError> {
    if action.trim().starts_with(TASK_PREFIX) && schedule_id.len() + TASK_ID_SUFFIX_LEN > MAX_ID_LEN
    {
        return Err(VaultpilotError::validation(format!(
            "schedule id '{}' is too long for task: actions (at most {} characters)",
            schedule_id,
            MAX_ID_LEN - TASK_ID_SUFFIX_LEN
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn shell_command(command_line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command_line);
    cmd
}

#[cfg(windows)]
fn shell_command(command_line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command_line);
    cmd
}

fn collaborator_error(err: VaultpilotError) -> CollaboratorError {
    match err.class() {
        ErrorClass::Conflict | ErrorClass::Transient => CollaboratorError::transient(err.to_string()),
        ErrorClass::Validation | ErrorClass::Configuration => {
            CollaboratorError::configuration(err.to_string())
        }
        ErrorClass::Fatal => CollaboratorError::fatal(err.to_string()),
    }
}

#[async_trait]
impl ActionDispatcher for BuiltinActionDispatcher {
    async fn invoke(&self, request: &ActionRequest) -> Result<ActionReceipt, CollaboratorError> {
        let action = request.action.trim();
        if let Some(prompt) = action.strip_prefix(TASK_PREFIX) {
            self.start_task(request, prompt.trim())
        } else if let Some(command_line) = action.strip_prefix(EXEC_PREFIX) {
            self.exec(command_line.trim()).await
        } else {
            Err(CollaboratorError::configuration(format!(
                "unknown action '{action}' (expected task:<prompt> or exec:<command>)"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::models::TaskStatus;
    use crate::storage::TypedStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;
    use vaultpilot_storage::{JsonlAuditLog, VaultStore};
    use vaultpilot_traits::{AuditSink, FailureCategory, Reasoner, StepOutcome, StepRequest};

    struct Idle;

    #[async_trait]
    impl Reasoner for Idle {
        async fn perform_step(
            &self,
            _request: &StepRequest,
        ) -> Result<StepOutcome, CollaboratorError> {
            Ok(StepOutcome::progress("idle"))
        }
    }

    fn dispatcher() -> (TempDir, IterationEngine, BuiltinActionDispatcher) {
        let dir = TempDir::new().unwrap();
        let store = TypedStore::new(Arc::new(VaultStore::open(dir.path()).unwrap()));
        let sink: Arc<dyn AuditSink> = Arc::new(JsonlAuditLog::open_in_vault(dir.path()).unwrap());
        let engine = IterationEngine::new(store, sink, Arc::new(Idle), EngineConfig::default());
        let dispatcher = BuiltinActionDispatcher::new(engine.clone());
        (dir, engine, dispatcher)
    }

    fn request(action: &str) -> ActionRequest {
        ActionRequest {
            schedule_id: "briefing".to_string(),
            action: action.to_string(),
            fired_at: DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            catch_up: false,
        }
    }

    #[tokio::test]
    async fn task_action_starts_a_named_task() {
        let (_dir, engine, dispatcher) = dispatcher();
        let receipt = dispatcher
            .invoke(&request("task: prepare the morning briefing"))
            .await
            .unwrap();
        assert_eq!(receipt.detail, "started task briefing-202405010800");

        let task = engine.get_task("briefing-202405010800").unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.prompt, "prepare the morning briefing");
        assert_eq!(task.max_iterations, EngineConfig::default().default_max_iterations);

        // Same minute again is not an error.
        assert!(dispatcher.invoke(&request("task:again")).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_and_empty_actions_are_configuration_failures() {
        let (_dir, _engine, dispatcher) = dispatcher();
        let unknown = dispatcher.invoke(&request("email:boss")).await.unwrap_err();
        assert_eq!(unknown.category, FailureCategory::Configuration);
        let empty_prompt = dispatcher.invoke(&request("task:   ")).await.unwrap_err();
        assert_eq!(empty_prompt.category, FailureCategory::Configuration);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_action_reports_exit_status() {
        let (_dir, _engine, dispatcher) = dispatcher();
        let ok = dispatcher.invoke(&request("exec: echo audited")).await.unwrap();
        assert_eq!(ok.detail, "audited");

        let failed = dispatcher.invoke(&request("exec: exit 4")).await.unwrap_err();
        assert_eq!(failed.category, FailureCategory::Transient);
        assert!(failed.message.contains("code 4"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_exec_action_times_out_as_transient() {
        let (_dir, _engine, dispatcher) = dispatcher();
        let dispatcher = dispatcher.with_exec_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = dispatcher.invoke(&request("exec: sleep 30")).await.unwrap_err();
        assert_eq!(err.category, FailureCategory::Transient);
        assert!(err.message.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn task_actions_need_room_for_the_id_suffix() {
        let longest = "s".repeat(MAX_ID_LEN - TASK_ID_SUFFIX_LEN);
        let too_long = "s".repeat(MAX_ID_LEN - TASK_ID_SUFFIX_LEN + 1);
        assert!(check_schedule_action(&longest, "task:digest").is_ok());
        assert!(matches!(
            check_schedule_action(&too_long, "task:digest"),
            Err(VaultpilotError::Validation(_))
        ));
        assert!(check_schedule_action(&too_long, "exec:true").is_ok());

        let task_id = format!("{longest}-202405010800");
        assert_eq!(task_id.len(), MAX_ID_LEN);
        assert!(vaultpilot_traits::validate_record_id(&task_id).is_ok());
    }
}
