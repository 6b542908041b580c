//! Append-only audit log of state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One state transition, as recorded by the component that made it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Arrival order, assigned by the sink on append
    #[serde(default)]
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Component that emitted the event (engine, scheduler, supervisor)
    pub component: String,
    /// What happened, e.g. `paused` or `quarantined`
    pub event_kind: String,
    /// Task, schedule or component id the event is about
    pub subject_id: String,
    /// Outcome label, e.g. `ok`, `failed`, `quarantined`
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(
        component: impl Into<String>,
        event_kind: impl Into<String>,
        subject_id: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            component: component.into(),
            event_kind: event_kind.into(),
            subject_id: subject_id.into(),
            outcome: outcome.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Filter for reading the audit log back.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Only events about this subject
    pub subject: Option<String>,
    /// Keep only the most recent N matching events
    pub limit: Option<usize>,
}

impl AuditQuery {
    /// Apply subject filter and tail limit to events already in arrival order.
    pub fn apply(&self, events: Vec<AuditEvent>) -> Vec<AuditEvent> {
        let mut matching: Vec<AuditEvent> = events
            .into_iter()
            .filter(|e| self.subject.as_deref().is_none_or(|s| e.subject_id == s))
            .collect();
        if let Some(limit) = self.limit
            && matching.len() > limit
        {
            matching.drain(..matching.len() - limit);
        }
        matching
    }
}

/// Sink for audit events. Events are never mutated after `append`.
pub trait AuditSink: Send + Sync {
    /// Append an event, returning it with its assigned sequence number.
    fn append(&self, event: AuditEvent) -> Result<AuditEvent, StoreError>;

    /// Read events back in arrival order.
    fn list(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(subject: &str, sequence: u64) -> AuditEvent {
        let mut e = AuditEvent::new("engine", "task.stepped", subject, "ok");
        e.sequence = sequence;
        e
    }

    #[test]
    fn query_filters_subject_and_keeps_tail() {
        let events = vec![event("a", 1), event("b", 2), event("a", 3), event("a", 4)];
        let query = AuditQuery {
            subject: Some("a".into()),
            limit: Some(2),
        };
        let result = query.apply(events);
        let sequences: Vec<u64> = result.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![3, 4]);
    }

    #[test]
    fn detail_is_omitted_when_absent() {
        let json = serde_json::to_value(AuditEvent::new("s", "k", "id", "ok")).unwrap();
        assert!(json.get("detail").is_none());
    }
}
