//! Reasoning collaborator backed by an external CLI process.
//!
//! The process receives the step request as JSON on stdin and must print a
//! JSON object `{"summary": "...", "done": bool}` on stdout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info};
use vaultpilot_traits::{CollaboratorError, Reasoner, StepOutcome, StepRequest};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    /// Executable to run for each step; unset means no reasoner is available
    pub binary: Option<String>,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

pub struct CliReasoner {
    config: ReasonerConfig,
}

impl CliReasoner {
    pub fn new(config: ReasonerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Reasoner for CliReasoner {
    async fn perform_step(&self, request: &StepRequest) -> Result<StepOutcome, CollaboratorError> {
        let Some(binary) = self.config.binary.as_deref() else {
            return Err(CollaboratorError::configuration(
                "no reasoner binary configured ([reasoner] binary)",
            ));
        };
        let input = serde_json::to_vec(request)
            .map_err(|e| CollaboratorError::fatal(format!("Failed to encode step request: {e}")))?;

        info!(
            binary,
            task_id = %request.task_id,
            iteration = request.iteration,
            "Starting reasoner step"
        );

        let mut cmd = Command::new(binary);
        cmd.args(&self.config.args);
        if let Some(ref cwd) = self.config.working_dir {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            error!(binary, error = %e, "Failed to spawn reasoner process");
            CollaboratorError::configuration(format!("Failed to spawn reasoner '{binary}': {e}"))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            // The process may exit without reading its input.
            if let Err(e) = stdin.write_all(&input).await {
                debug!(error = %e, "Reasoner closed stdin early");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CollaboratorError::transient(format!("Failed to wait for reasoner: {e}")))?;

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(binary, exit_code, stderr = %stderr.trim(), "Reasoner step failed");
            return Err(CollaboratorError::transient(format!(
                "reasoner '{}' failed with exit code {}: {}",
                binary,
                exit_code,
                stderr.trim()
            )));
        }

        let outcome: StepOutcome = serde_json::from_slice(&output.stdout).map_err(|e| {
            CollaboratorError::fatal(format!("reasoner produced unreadable output: {e}"))
        })?;
        debug!(task_id = %request.task_id, done = outcome.done, "Reasoner step finished");
        Ok(outcome)
    }
}
