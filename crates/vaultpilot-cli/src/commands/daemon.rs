use anyhow::Result;
use vaultpilot_core::AppCore;

pub async fn run(core: &AppCore) -> Result<()> {
    println!(
        "Daemon running on {} (ctrl-c to stop)",
        core.vault_path.display()
    );
    vaultpilot_core::daemon::run_daemon(core).await?;
    println!("Daemon stopped.");
    Ok(())
}
