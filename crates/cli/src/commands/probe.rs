use std::path::Path;

use anyhow::{Context, Result};
use pathfinder_core::db::WorkContext;
use pathfinder_core::services::pe::probe_pe;

/// Show machine, entry point and imported target APIs of a PE image.
pub fn probe_command(path: &Path, config: Option<&Path>, json: bool) -> Result<()> {
    let ctx = WorkContext::load(config, None)?;
    let summary = probe_pe(path, &ctx.config.engine.target_apis)
        .with_context(|| format!("Failed to probe {}", path.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!("Image: {}", path.display());
    println!("  Machine: {} ({})", summary.machine, if summary.is_64bit { "64-bit" } else { "32-bit" });
    println!("  Entry point: {:#x}", summary.entry_point);
    println!("  Imports: {}", summary.imports.len());
    if summary.target_imports.is_empty() {
        println!("  Target APIs: (none)");
    } else {
        println!("  Target APIs: {}", summary.target_imports.join(", "));
    }
    Ok(())
}
