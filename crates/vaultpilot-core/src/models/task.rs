//! Task record model for the iteration engine.
//!
//! A task advances one step at a time towards the objective in `prompt`.
//! Its status follows
//! `Created -> Running -> {Paused <-> Running} -> {Completed | Failed | Cancelled}`
//! and terminal states never change again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vaultpilot_traits::{FailureCategory, RecordKind, Result, VaultpilotError};

use crate::storage::Record;

/// Status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Recorded but not yet started
    Created,
    /// Steps may be taken
    Running,
    /// Held at an iteration boundary, resumable
    Paused,
    /// Objective reported as satisfied
    Completed,
    /// Unrecoverable failure, see `failure_category`
    Failed,
    /// Stopped by request
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Created,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Edges of the task state machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Created, Cancelled)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown task status '{s}'"))
    }
}

/// One autonomous task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    /// Objective, fixed at creation
    pub prompt: String,
    pub status: TaskStatus,
    pub iteration: u32,
    pub max_iterations: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Latest progress snapshot from the reasoning collaborator
    #[serde(default)]
    pub output_summary: String,
    /// Why the task failed
    #[serde(default)]
    pub failure_category: Option<FailureCategory>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// A step finished the objective while the task was paused; resuming
    /// completes it without another step
    #[serde(default)]
    pub objective_met: bool,
}

impl TaskRecord {
    pub fn new(
        task_id: impl Into<String>,
        prompt: impl Into<String>,
        max_iterations: u32,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            prompt: prompt.into(),
            status,
            iteration: 0,
            max_iterations,
            created_at: now,
            updated_at: now,
            output_summary: String::new(),
            failure_category: None,
            last_error: None,
            objective_met: false,
        }
    }

    pub fn remaining_iterations(&self) -> u32 {
        self.max_iterations.saturating_sub(self.iteration)
    }

    pub fn limit_reached(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Move to `next`, rejecting edges outside the state machine.
    pub fn transition(&mut self, next: TaskStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(VaultpilotError::validation(format!(
                "task '{}' cannot go from {} to {}",
                self.task_id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Record one completed step. Progress made while paused is kept but the
    /// task stays paused; a `done` step is remembered in `objective_met`.
    pub fn record_step(&mut self, summary: String, done: bool, now: DateTime<Utc>) -> Result<()> {
        if self.limit_reached() {
            return Err(VaultpilotError::IterationLimitExceeded {
                task_id: self.task_id.clone(),
                max_iterations: self.max_iterations,
            });
        }
        self.iteration += 1;
        self.output_summary = summary;
        self.updated_at = now;
        if done {
            if self.status == TaskStatus::Running {
                self.transition(TaskStatus::Completed, now)?;
            } else {
                self.objective_met = true;
            }
        }
        Ok(())
    }

    /// Fail the task, keeping the last good summary.
    pub fn fail(
        &mut self,
        category: FailureCategory,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transition(TaskStatus::Failed, now)?;
        self.failure_category = Some(category);
        self.last_error = Some(error.into());
        Ok(())
    }
}

impl Record for TaskRecord {
    const KIND: RecordKind = RecordKind::Task;

    fn id(&self) -> &str {
        &self.task_id
    }

    fn render_body(&self) -> String {
        let mut body = format!(
            "# {}\n\n**Status:** {} · iteration {}/{}\n\n## Objective\n\n{}\n",
            self.task_id, self.status, self.iteration, self.max_iterations, self.prompt
        );
        if !self.output_summary.is_empty() {
            body.push_str("\n## Latest summary\n\n");
            body.push_str(&self.output_summary);
            body.push('\n');
        }
        if let Some(category) = self.failure_category {
            body.push_str(&format!("\n## Failure\n\n{category}"));
            if let Some(error) = &self.last_error {
                body.push_str(&format!(": {error}"));
            }
            body.push('\n');
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(max: u32) -> TaskRecord {
        TaskRecord::new("t1", "write the report", max, TaskStatus::Running, Utc::now())
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            for next in TaskStatus::ALL {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn pause_resume_cycle_is_allowed() {
        let mut task = running(3);
        let now = Utc::now();
        task.transition(TaskStatus::Paused, now).unwrap();
        task.transition(TaskStatus::Running, now).unwrap();
        assert!(task.transition(TaskStatus::Created, now).is_err());
    }

    #[test]
    fn record_step_respects_ceiling() {
        let mut task = running(2);
        let now = Utc::now();
        task.record_step("one".into(), false, now).unwrap();
        task.record_step("two".into(), false, now).unwrap();
        assert_eq!(task.iteration, 2);
        assert_eq!(task.status, TaskStatus::Running);

        let err = task.record_step("three".into(), false, now).unwrap_err();
        assert!(matches!(err, VaultpilotError::IterationLimitExceeded { .. }));
        assert_eq!(task.iteration, 2);
        assert_eq!(task.output_summary, "two");
    }

    #[test]
    fn done_step_completes_running_task() {
        let mut task = running(5);
        task.record_step("finished".into(), true, Utc::now()).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.iteration, 1);
    }

    #[test]
    fn done_step_while_paused_keeps_progress_but_stays_paused() {
        let mut task = running(5);
        let now = Utc::now();
        task.transition(TaskStatus::Paused, now).unwrap();
        task.record_step("finished".into(), true, now).unwrap();
        assert_eq!(task.status, TaskStatus::Paused);
        assert_eq!(task.iteration, 1);
        assert!(task.objective_met);
    }

    #[test]
    fn fail_keeps_last_summary() {
        let mut task = running(5);
        let now = Utc::now();
        task.record_step("halfway".into(), false, now).unwrap();
        task.fail(FailureCategory::Fatal, "corrupt workspace", now)
            .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.output_summary, "halfway");
        assert_eq!(task.failure_category, Some(FailureCategory::Fatal));
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Paused".parse::<TaskStatus>().unwrap(), TaskStatus::Paused);
        assert!("sleeping".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn body_mentions_failure() {
        let mut task = running(1);
        task.fail(FailureCategory::LimitExceeded, "ceiling", Utc::now())
            .unwrap();
        let body = task.render_body();
        assert!(body.contains("limit_exceeded: ceiling"));
        assert!(body.contains("## Objective"));
    }
}
