use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use serde_json::json;
use vaultpilot_core::AppCore;
use vaultpilot_core::models::ScheduleRecord;
use vaultpilot_core::scheduler::{FireOutcome, FireResult};

use crate::cli::{ScheduleAddArgs, ScheduleCommands};
use crate::commands::utils::format_time;
use crate::output::json::print_json;
use crate::output::table::print_rows;
use crate::output::OutputFormat;

pub async fn run(core: &AppCore, command: ScheduleCommands, format: OutputFormat) -> Result<()> {
    match command {
        ScheduleCommands::Add(args) => add_schedule(core, args, format),
        ScheduleCommands::List => list_schedules(core, format),
        ScheduleCommands::Show { id, upcoming } => show_schedule(core, &id, upcoming, format),
        ScheduleCommands::Enable { id } => set_enabled(core, &id, true, format),
        ScheduleCommands::Disable { id } => set_enabled(core, &id, false, format),
        ScheduleCommands::Remove { id } => {
            core.scheduler.remove(&id)?;
            if format.is_json() {
                return print_json(&json!({ "removed": id }));
            }
            println!("Schedule removed: {id}");
            Ok(())
        }
        ScheduleCommands::Run { id } => {
            let outcome = core.scheduler.run_now(&id, Utc::now()).await?;
            if format.is_json() {
                return print_json(&outcome);
            }
            print_fire(&outcome);
            Ok(())
        }
        ScheduleCommands::Tick => {
            let report = core.scheduler.tick(Utc::now()).await?;
            if format.is_json() {
                return print_json(&report);
            }
            for outcome in &report.fired {
                print_fire(outcome);
            }
            for id in &report.skipped {
                println!("{} {id}: missed firings skipped", "skipped".dimmed());
            }
            for id in &report.deferred {
                println!("{} {id}: catch-up on next poll", "deferred".yellow());
            }
            for id in &report.invalid {
                println!("{} {id}: definition no longer parses", "invalid".red());
            }
            for (id, error) in &report.errors {
                println!("{} {id}: {error}", "error".red());
            }
            if report.fired.is_empty()
                && report.skipped.is_empty()
                && report.deferred.is_empty()
                && report.invalid.is_empty()
                && report.errors.is_empty()
            {
                println!("Nothing due.");
            }
            Ok(())
        }
    }
}

fn add_schedule(core: &AppCore, args: ScheduleAddArgs, format: OutputFormat) -> Result<()> {
    let now = Utc::now();
    let mut schedule = ScheduleRecord::new(args.id, args.name, args.cron, args.action, now)
        .with_missed_strategy(args.missed)
        .with_enabled(!args.disabled);
    if let Some(timezone) = args.timezone {
        schedule = schedule.with_timezone(timezone);
    }
    let schedule = core.scheduler.add(schedule, now)?;

    if format.is_json() {
        return print_json(&schedule);
    }
    println!("Schedule added: {}", schedule.id.bold());
    println!("Next run:    {}", format_time(schedule.next_run));
    Ok(())
}

fn list_schedules(core: &AppCore, format: OutputFormat) -> Result<()> {
    let schedules = core.scheduler.list()?;
    if format.is_json() {
        return print_json(&schedules);
    }

    let rows = schedules
        .iter()
        .map(|schedule| {
            vec![
                schedule.id.clone(),
                schedule.cron_expression.clone(),
                schedule.timezone.clone(),
                if schedule.enabled { "yes" } else { "no" }.to_string(),
                format_time(schedule.last_run),
                format_time(schedule.next_run),
                schedule.action.clone(),
            ]
        })
        .collect();
    print_rows(
        vec!["ID", "Cron", "Timezone", "Enabled", "Last Run", "Next Run", "Action"],
        rows,
        "No schedules.",
    )
}

fn show_schedule(core: &AppCore, id: &str, upcoming: usize, format: OutputFormat) -> Result<()> {
    let schedule = core.scheduler.get(id)?;
    let preview = core.scheduler.preview(id, Utc::now(), upcoming)?;

    if format.is_json() {
        return print_json(&json!({
            "schedule": schedule,
            "upcoming": preview,
        }));
    }

    println!("ID:          {}", schedule.id);
    println!("Name:        {}", schedule.name);
    println!("Cron:        {} ({})", schedule.cron_expression, schedule.timezone);
    println!("Action:      {}", schedule.action);
    println!("Enabled:     {}", schedule.enabled);
    println!("Missed:      {}", schedule.missed_strategy);
    println!("Last run:    {}", format_time(schedule.last_run));
    println!("Next run:    {}", format_time(schedule.next_run));
    println!("Fired:       {}", schedule.fire_count);
    if schedule.failure_count > 0 {
        println!("Failures:    {}", schedule.failure_count);
    }
    if let Some(error) = &schedule.last_error {
        println!("Last error:  {error}");
    }
    if !preview.is_empty() {
        println!("\nUpcoming:");
        for time in preview {
            println!("  {}", format_time(Some(time)));
        }
    }
    Ok(())
}

fn set_enabled(core: &AppCore, id: &str, enabled: bool, format: OutputFormat) -> Result<()> {
    let schedule = core.scheduler.set_enabled(id, enabled, Utc::now())?;
    if format.is_json() {
        return print_json(&schedule);
    }
    let state = if enabled { "enabled" } else { "disabled" };
    println!("Schedule {state}: {}", schedule.id);
    println!("Next run:    {}", format_time(schedule.next_run));
    Ok(())
}

fn print_fire(outcome: &FireOutcome) {
    let label = if outcome.catch_up { "catch-up" } else { "fired" };
    match &outcome.result {
        FireResult::Ok { detail } => {
            println!("{} {}: {}", label.green(), outcome.schedule_id, detail);
        }
        FireResult::Error { category, message } => {
            println!(
                "{} {}: {} failure: {}",
                label.red(),
                outcome.schedule_id,
                category,
                message
            );
        }
    }
    if outcome.missed > 0 {
        println!("  missed occurrences: {}", outcome.missed);
    }
    println!("  next run: {}", format_time(outcome.next_run));
}
