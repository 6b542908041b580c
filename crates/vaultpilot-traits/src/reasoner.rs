//! Boundary to the external collaborator that performs one unit of work.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::category::CollaboratorError;

/// Input for a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub task_id: String,
    pub prompt: String,
    pub prior_summary: String,
    pub iteration: u32,
}

/// What the collaborator reports back. The engine only interprets `done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub summary: String,
    #[serde(default)]
    pub done: bool,
}

impl StepOutcome {
    pub fn progress(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            done: false,
        }
    }

    pub fn finished(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            done: true,
        }
    }
}

/// Performs one step of a task. May take a long time; callers bound it with a timeout.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn perform_step(&self, request: &StepRequest) -> Result<StepOutcome, CollaboratorError>;
}
