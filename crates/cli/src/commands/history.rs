use std::path::Path;

use anyhow::{Context, Result};
use pathfinder_core::db::{open_result_db, WorkContext};

/// List stored runs, optionally for one driver.
pub fn history_command(
    config: Option<&Path>,
    work_dir: Option<&Path>,
    driver: Option<&str>,
    json: bool,
) -> Result<()> {
    let ctx = WorkContext::load(config, work_dir)?;
    let db = open_result_db(&ctx.layout)?;
    let runs = db.list_runs(driver).context("Failed to list runs")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    println!("Runs:");
    if runs.is_empty() {
        println!("(none)");
        return Ok(());
    }
    for run in runs {
        println!(
            "- {} status={} bonus={} handler={} handlers={} paths={} at {}",
            run.driver,
            run.ret_code,
            run.weight_bonus,
            run.handler_type,
            run.handler_count,
            run.path_count,
            run.finished_at
        );
    }
    Ok(())
}
