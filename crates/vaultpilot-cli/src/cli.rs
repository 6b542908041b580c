use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use vaultpilot_core::models::{MissedStrategy, TaskStatus};
use vaultpilot_core::paths::VAULTPILOT_HOME_ENV;
use vaultpilot_traits::FailureCategory;

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "vaultpilot")]
#[command(version, about = "Vaultpilot - autonomous tasks and schedules over a markdown vault")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Home directory (defaults to ~/.vaultpilot)
    #[arg(long, global = true, env = VAULTPILOT_HOME_ENV)]
    pub home: Option<PathBuf>,

    /// Vault folder, overriding the configured one
    #[arg(long, global = true)]
    pub vault: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Task management
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Schedule management
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },

    /// Component health
    Health {
        #[command(subcommand)]
        command: HealthCommands,
    },

    /// Show recorded audit events
    Audit(AuditArgs),

    /// Pause every running task at its next iteration boundary
    PauseAll,

    /// Lift a global pause
    ResumeAll,

    /// Show task, schedule and health counts
    Status,

    /// Run the scheduler and supervisor until interrupted
    Daemon,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a task and start it
    Start {
        id: String,
        /// Objective for the task
        #[arg(short, long)]
        prompt: String,
        /// Iteration ceiling (defaults to engine.default_max_iterations)
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Perform one iteration
    Step { id: String },
    /// Step until the task completes, fails or pauses
    Run { id: String },
    Pause { id: String },
    Resume { id: String },
    Cancel { id: String },
    Show { id: String },
    List {
        /// Only tasks with this status
        #[arg(long)]
        status: Option<TaskStatus>,
    },
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Add a cron schedule
    Add(ScheduleAddArgs),
    List,
    /// Show a schedule with its upcoming firings
    Show {
        id: String,
        /// Number of upcoming firings to list
        #[arg(long, default_value = "5")]
        upcoming: usize,
    },
    Enable { id: String },
    Disable { id: String },
    Remove { id: String },
    /// Fire a schedule now regardless of its due time
    Run { id: String },
    /// Evaluate every schedule once
    Tick,
}

#[derive(Args)]
pub struct ScheduleAddArgs {
    pub id: String,
    #[arg(long)]
    pub name: String,
    /// Five-field cron expression or macro such as @daily
    #[arg(long)]
    pub cron: String,
    /// Action descriptor: task:<prompt> or exec:<command>
    #[arg(long)]
    pub action: String,
    /// IANA timezone name, or "local"
    #[arg(long)]
    pub timezone: Option<String>,
    /// What to do about firings missed while down
    #[arg(long, default_value = "skip")]
    pub missed: MissedStrategy,
    /// Store the schedule disabled
    #[arg(long)]
    pub disabled: bool,
}

#[derive(Subcommand)]
pub enum HealthCommands {
    List,
    /// Record a health check result for a component
    Report {
        id: String,
        /// Successful check
        #[arg(long, conflicts_with = "failure", required_unless_present = "failure")]
        ok: bool,
        /// Failed check of this category
        #[arg(long)]
        failure: Option<FailureCategory>,
        #[arg(long, default_value = "reported from cli")]
        message: String,
    },
    /// Clear a quarantine
    Reset { id: String },
    /// Run one supervisor pass
    Reconcile,
}

#[derive(Args)]
pub struct AuditArgs {
    /// Show only the most recent N events
    #[arg(long)]
    pub limit: Option<usize>,
    /// Only events about this task, schedule or component
    #[arg(long)]
    pub subject: Option<String>,
}
