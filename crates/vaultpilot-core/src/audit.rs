//! Audit emission helper shared by the engine, scheduler and supervisor.

use std::sync::Arc;
use tracing::error;
use vaultpilot_traits::{AuditEvent, AuditSink};

pub const ENGINE_COMPONENT: &str = "engine";
pub const SCHEDULER_COMPONENT: &str = "scheduler";
pub const SUPERVISOR_COMPONENT: &str = "supervisor";

/// Appends audit events on behalf of one component.
///
/// The state change an event describes is already persisted when the event
/// is appended, so a sink failure is logged rather than returned.
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    component: &'static str,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>, component: &'static str) -> Self {
        Self { sink, component }
    }

    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }

    pub fn record(&self, event_kind: &str, subject_id: &str, outcome: &str, detail: Option<String>) {
        let mut event = AuditEvent::new(self.component, event_kind, subject_id, outcome);
        event.detail = detail;
        if let Err(err) = self.sink.append(event) {
            error!(
                error = %err,
                component = self.component,
                event_kind,
                subject_id,
                "Failed to append audit event"
            );
        }
    }
}
