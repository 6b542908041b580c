use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use vaultpilot_core::AppCore;
use vaultpilot_core::health::HealthOutcome;
use vaultpilot_core::models::{HealthRecord, HealthStatus};

use crate::cli::HealthCommands;
use crate::commands::utils::{excerpt, format_time};
use crate::output::json::print_json;
use crate::output::table::print_rows;
use crate::output::OutputFormat;

pub async fn run(core: &AppCore, command: HealthCommands, format: OutputFormat) -> Result<()> {
    let now = Utc::now();
    match command {
        HealthCommands::List => list_health(core, format),
        HealthCommands::Report {
            id,
            ok: _,
            failure,
            message,
        } => {
            let outcome = match failure {
                Some(category) => HealthOutcome::failure(category, message),
                None => HealthOutcome::Success,
            };
            let record = core.health.report(&id, outcome, now)?;
            print_record(&record, format)
        }
        HealthCommands::Reset { id } => {
            let record = core.health.reset(&id, now)?;
            print_record(&record, format)
        }
        HealthCommands::Reconcile => {
            let report = core.supervisor.reconcile(now).await?;
            if format.is_json() {
                return print_json(&report);
            }
            for id in &report.stale {
                println!("{} {id}: heartbeat missed", "stale".yellow());
            }
            for id in &report.restarted {
                println!("{} {id}", "restarted".green());
            }
            for id in &report.restart_failed {
                println!("{} {id}", "restart failed".red());
            }
            for id in &report.quarantined {
                println!("{} {id}", "quarantined".red().bold());
            }
            for (id, remaining_ms) in &report.waiting {
                println!("{} {id}: retry in {}s", "waiting".dimmed(), remaining_ms / 1000);
            }
            if report.is_quiet() && report.waiting.is_empty() {
                println!("All components healthy.");
            }
            Ok(())
        }
    }
}

fn list_health(core: &AppCore, format: OutputFormat) -> Result<()> {
    let records = core.health.list()?;
    if format.is_json() {
        return print_json(&records);
    }

    let rows = records
        .iter()
        .map(|record| {
            vec![
                record.component_id.clone(),
                colored_status(record.status).to_string(),
                record.consecutive_failures.to_string(),
                record.restart_count.to_string(),
                format_time(record.last_heartbeat),
                record
                    .last_error
                    .as_deref()
                    .map(|error| excerpt(error, 48))
                    .unwrap_or_default(),
            ]
        })
        .collect();
    print_rows(
        vec!["Component", "Status", "Failures", "Restarts", "Last Heartbeat", "Last Error"],
        rows,
        "No monitored components.",
    )
}

fn print_record(record: &HealthRecord, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(record);
    }
    println!("Component:   {}", record.component_id.bold());
    println!("Status:      {}", colored_status(record.status));
    println!("Failures:    {}", record.consecutive_failures);
    if let Some(category) = record.last_error_category {
        println!("Category:    {category}");
    }
    if record.status == HealthStatus::Quarantined {
        println!(
            "Automatic recovery stopped. Clear with: vaultpilot health reset {}",
            record.component_id
        );
    }
    Ok(())
}

fn colored_status(status: HealthStatus) -> colored::ColoredString {
    match status {
        HealthStatus::Healthy => status.as_str().green(),
        HealthStatus::Degraded => status.as_str().yellow(),
        HealthStatus::Unresponsive => status.as_str().red(),
        HealthStatus::Restarting => status.as_str().cyan(),
        HealthStatus::Quarantined => status.as_str().red().bold(),
    }
}
