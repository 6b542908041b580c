use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use vaultpilot_core::paths;

/// Log to a daily file under `<home>/logs`, and to stderr as well when
/// `to_stderr` is set. The guard must live until the process exits.
pub fn init(home: &Path, verbose: bool, to_stderr: bool) -> Result<WorkerGuard> {
    let log_dir = paths::ensure_dir(paths::logs_dir(home))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "vaultpilot.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_level(true);
    let stderr_layer = to_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;
    Ok(guard)
}
