//! Read-only aggregate view over the vault. Computed on demand, never stored.

use serde::Serialize;
use std::collections::BTreeMap;
use vaultpilot_traits::Result;

use super::{HealthRecord, HealthStatus, ScheduleRecord, TaskRecord, TaskStatus};
use crate::storage::TypedStore;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub tasks_by_status: BTreeMap<String, usize>,
    pub schedules_total: usize,
    pub schedules_enabled: usize,
    pub components: Vec<ComponentSummary>,
    pub quarantined: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentSummary {
    pub component_id: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
}

impl StatusReport {
    pub fn collect(store: &TypedStore) -> Result<Self> {
        let tasks: Vec<TaskRecord> = store.list_records()?;
        let schedules: Vec<ScheduleRecord> = store.list_records()?;
        let health: Vec<HealthRecord> = store.list_records()?;

        let mut tasks_by_status: BTreeMap<String, usize> = TaskStatus::ALL
            .iter()
            .map(|status| (status.to_string(), 0))
            .collect();
        for task in &tasks {
            *tasks_by_status.entry(task.status.to_string()).or_default() += 1;
        }

        let quarantined = health
            .iter()
            .filter(|h| h.status == HealthStatus::Quarantined)
            .map(|h| h.component_id.clone())
            .collect();

        Ok(Self {
            tasks_by_status,
            schedules_total: schedules.len(),
            schedules_enabled: schedules.iter().filter(|s| s.enabled).count(),
            components: health
                .into_iter()
                .map(|h| ComponentSummary {
                    component_id: h.component_id,
                    status: h.status,
                    consecutive_failures: h.consecutive_failures,
                })
                .collect(),
            quarantined,
        })
    }
}
