use colored::Colorize;
use vaultpilot_traits::{ErrorClass, VaultpilotError};

/// Process exit code for an error: the taxonomy class when the error came
/// from a core call, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<VaultpilotError>())
        .map(|err| err.class().exit_code())
        .unwrap_or(1)
}

pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(suggestion) = suggestion(&err) {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  {suggestion}");
    }

    std::process::exit(exit_code(&err));
}

fn suggestion(err: &anyhow::Error) -> Option<String> {
    let core = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<VaultpilotError>())?;
    let msg = core.to_string().to_lowercase();

    match core {
        VaultpilotError::NotFound { kind, .. } => Some(format!(
            "List existing records with: {} vaultpilot {} list",
            "$".dimmed(),
            kind
        )),
        VaultpilotError::TaskBusy(_) => {
            Some("Another step is in flight for this task; try again when it finishes.".into())
        }
        VaultpilotError::IterationLimitExceeded { .. } => Some(
            "Start a new task with a higher --max-iterations to continue the work.".into(),
        ),
        _ if msg.contains("reasoner") => {
            Some("Set [reasoner] binary in config.toml to the step executable.".into())
        }
        _ if core.class() == ErrorClass::Configuration => {
            Some("Check config.toml in the vaultpilot home directory.".into())
        }
        _ => None,
    }
}
