mod cli;
mod commands;
mod completions;
mod error;
mod logging;
mod output;
mod setup;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        completions::generate_completions(shell);
        return;
    }

    if let Err(err) = run(cli).await {
        error::handle_error(err);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let home = setup::resolve_home(cli.home)?;
    let _guard = logging::init(&home, cli.verbose, matches!(cli.command, Commands::Daemon))?;

    let config = setup::load_config(&home, cli.vault.as_deref())?;
    let core = setup::prepare_core(&home, config)?;
    let format = cli.format;

    match cli.command {
        Commands::Task { command } => commands::task::run(&core, command, format).await,
        Commands::Schedule { command } => commands::schedule::run(&core, command, format).await,
        Commands::Health { command } => commands::health::run(&core, command, format).await,
        Commands::Audit(args) => commands::audit::run(&core, args, format),
        Commands::PauseAll => commands::pause::pause_all(&core, format),
        Commands::ResumeAll => commands::pause::resume_all(&core, format),
        Commands::Status => commands::status::run(&core, format),
        Commands::Daemon => commands::daemon::run(&core).await,
        Commands::Completions { .. } => Ok(()),
    }
}
