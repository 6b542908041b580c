use anyhow::Result;
use vaultpilot_core::AppCore;
use vaultpilot_traits::{AuditQuery, VaultpilotError};

use crate::cli::AuditArgs;
use crate::commands::utils::format_time;
use crate::output::json::print_json;
use crate::output::table::print_rows;
use crate::output::OutputFormat;

pub fn run(core: &AppCore, args: AuditArgs, format: OutputFormat) -> Result<()> {
    let query = AuditQuery {
        subject: args.subject,
        limit: args.limit,
    };
    let events = core.audit.list(&query).map_err(VaultpilotError::from)?;
    if format.is_json() {
        return print_json(&events);
    }

    let rows = events
        .into_iter()
        .map(|event| {
            vec![
                event.sequence.to_string(),
                format_time(Some(event.timestamp)),
                event.component,
                event.event_kind,
                event.subject_id,
                event.outcome,
                event.detail.unwrap_or_default(),
            ]
        })
        .collect();
    print_rows(
        vec!["#", "Time", "Component", "Event", "Subject", "Outcome", "Detail"],
        rows,
        "No audit events.",
    )
}
