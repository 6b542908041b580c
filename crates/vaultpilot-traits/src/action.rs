//! Boundary schedules fire through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::CollaboratorError;

/// A firing handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub schedule_id: String,
    /// Opaque action descriptor copied from the schedule
    pub action: String,
    pub fired_at: DateTime<Utc>,
    /// True when this firing makes up for missed windows
    #[serde(default)]
    pub catch_up: bool,
}

/// Successful dispatch result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub detail: String,
}

impl ActionReceipt {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn invoke(&self, request: &ActionRequest) -> Result<ActionReceipt, CollaboratorError>;
}
