use anyhow::Result;
use colored::Colorize;
use serde_json::json;
use vaultpilot_core::AppCore;

use crate::output::json::print_json;
use crate::output::OutputFormat;

pub fn run(core: &AppCore, format: OutputFormat) -> Result<()> {
    let report = core.status()?;
    let paused = core.pause_hook.is_paused();

    if format.is_json() {
        return print_json(&json!({
            "vault": core.vault_path,
            "backend": core.config.store.backend,
            "paused": paused,
            "report": report,
        }));
    }

    println!("Vaultpilot Status");
    println!("Vault:       {}", core.vault_path.display());
    if paused {
        println!("Pause:       {}", "all tasks paused (resume-all to lift)".yellow());
    }

    let counts: Vec<String> = report
        .tasks_by_status
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(status, count)| format!("{count} {status}"))
        .collect();
    if counts.is_empty() {
        println!("Tasks:       none");
    } else {
        println!("Tasks:       {}", counts.join(", "));
    }
    println!(
        "Schedules:   {} ({} enabled)",
        report.schedules_total, report.schedules_enabled
    );

    let unhealthy = report
        .components
        .iter()
        .filter(|c| c.status != vaultpilot_core::HealthStatus::Healthy)
        .count();
    println!(
        "Components:  {} monitored, {} unhealthy",
        report.components.len(),
        unhealthy
    );
    if !report.quarantined.is_empty() {
        println!(
            "Quarantined: {}",
            report.quarantined.join(", ").red().bold()
        );
    }
    Ok(())
}
