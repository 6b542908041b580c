use anyhow::Result;
use colored::Colorize;
use vaultpilot_core::AppCore;
use vaultpilot_core::models::{TaskRecord, TaskStatus};

use crate::cli::TaskCommands;
use crate::commands::utils::{excerpt, format_time};
use crate::output::json::print_json;
use crate::output::table::print_rows;
use crate::output::OutputFormat;

pub async fn run(core: &AppCore, command: TaskCommands, format: OutputFormat) -> Result<()> {
    match command {
        TaskCommands::Start {
            id,
            prompt,
            max_iterations,
        } => {
            let max = max_iterations.unwrap_or(core.config.engine.default_max_iterations);
            let task = core.engine.start(&id, &prompt, max)?;
            print_task(&task, "Task started", format)
        }
        TaskCommands::Step { id } => {
            let task = core.engine.step(&id).await?;
            print_task(&task, "Step finished", format)
        }
        TaskCommands::Run { id } => {
            let task = core.engine.run_until_settled(&id).await?;
            print_task(&task, "Task settled", format)
        }
        TaskCommands::Pause { id } => {
            let task = core.engine.pause(&id)?;
            print_task(&task, "Task paused", format)
        }
        TaskCommands::Resume { id } => {
            let task = core.engine.resume(&id)?;
            print_task(&task, "Task resumed", format)
        }
        TaskCommands::Cancel { id } => {
            let task = core.engine.cancel(&id)?;
            print_task(&task, "Task cancelled", format)
        }
        TaskCommands::Show { id } => {
            let task = core.engine.get_task(&id)?;
            show_task(&task, format)
        }
        TaskCommands::List { status } => list_tasks(core, status, format),
    }
}

fn print_task(task: &TaskRecord, headline: &str, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(task);
    }
    println!("{}: {}", headline, task.task_id.bold());
    print_progress(task);
    Ok(())
}

fn print_progress(task: &TaskRecord) {
    println!("Status:      {}", colored_status(task.status));
    println!("Iteration:   {}/{}", task.iteration, task.max_iterations);
    if let Some(category) = task.failure_category {
        println!("Failure:     {category}");
    }
    if let Some(error) = &task.last_error {
        println!("Last error:  {error}");
    }
    if !task.output_summary.is_empty() {
        println!("Summary:     {}", excerpt(&task.output_summary, 100));
    }
}

fn show_task(task: &TaskRecord, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(task);
    }
    println!("ID:          {}", task.task_id);
    print_progress(task);
    println!("Created:     {}", format_time(Some(task.created_at)));
    println!("Updated:     {}", format_time(Some(task.updated_at)));
    println!("\nPrompt:\n{}", task.prompt);
    if !task.output_summary.is_empty() {
        println!("\nOutput:\n{}", task.output_summary);
    }
    Ok(())
}

fn list_tasks(core: &AppCore, status: Option<TaskStatus>, format: OutputFormat) -> Result<()> {
    let tasks = core.engine.list_tasks(status)?;
    if format.is_json() {
        return print_json(&tasks);
    }

    let rows = tasks
        .iter()
        .map(|task| {
            vec![
                task.task_id.clone(),
                task.status.to_string(),
                format!("{}/{}", task.iteration, task.max_iterations),
                format_time(Some(task.updated_at)),
                excerpt(&task.output_summary, 48),
            ]
        })
        .collect();
    print_rows(
        vec!["ID", "Status", "Iteration", "Updated", "Summary"],
        rows,
        "No tasks.",
    )
}

pub fn colored_status(status: TaskStatus) -> colored::ColoredString {
    match status {
        TaskStatus::Running => status.as_str().green(),
        TaskStatus::Completed => status.as_str().cyan(),
        TaskStatus::Failed => status.as_str().red(),
        TaskStatus::Paused => status.as_str().yellow(),
        TaskStatus::Created | TaskStatus::Cancelled => status.as_str().dimmed(),
    }
}
