use anyhow::{Context, Result};
use serde_json::json;
use vaultpilot_core::AppCore;

use crate::output::json::print_json;
use crate::output::OutputFormat;

pub fn pause_all(core: &AppCore, format: OutputFormat) -> Result<()> {
    let hook = &core.pause_hook;
    hook.pause()
        .with_context(|| format!("Failed to create {}", hook.path().display()))?;

    if format.is_json() {
        return print_json(&json!({ "paused": true, "marker": hook.path() }));
    }
    println!("Global pause requested. Running tasks pause at their next step.");
    Ok(())
}

pub fn resume_all(core: &AppCore, format: OutputFormat) -> Result<()> {
    let hook = &core.pause_hook;
    let existed = hook
        .resume()
        .with_context(|| format!("Failed to remove {}", hook.path().display()))?;

    if format.is_json() {
        return print_json(&json!({ "paused": false, "was_paused": existed }));
    }
    if existed {
        println!("Global pause lifted. Resume paused tasks with: vaultpilot task resume <id>");
    } else {
        println!("No global pause was active.");
    }
    Ok(())
}
