use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use pathfinder_core::db::{open_result_db, WorkContext};
use pathfinder_core::services::{BatchRunner, InterestWeights};
use serde::Serialize;

use crate::commands::analyze::run_record;

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub drivers: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    /// Instance number; the child timeout is `instance * instance_timeout_minutes`.
    pub instance: u32,
    /// Overrides the weights file named in the config.
    pub weights: Option<PathBuf>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct BatchLine {
    driver: String,
    ret_code: Option<i32>,
    timed_out: bool,
    weight_bonus: i64,
}

/// Analyze each driver in its own child process and record the results.
pub fn batch_command(opts: &BatchOptions) -> Result<()> {
    let ctx = WorkContext::load(opts.config.as_deref(), opts.work_dir.as_deref())?;
    let weights_path = opts.weights.clone().or_else(|| ctx.config.weights.as_ref().map(PathBuf::from));
    let weights = match weights_path {
        Some(path) => Some(
            InterestWeights::load(&path)
                .with_context(|| format!("Failed to load weights {}", path.display()))?,
        ),
        None => None,
    };

    let program = std::env::current_exe().context("Failed to locate the pathfinder executable")?;
    let results_db = open_result_db(&ctx.layout)?;
    let runner = BatchRunner::new(program, ctx.layout.clone())
        .config_path(opts.config.clone())
        .instance(opts.instance)
        .timeout_unit(Duration::from_secs(ctx.config.instance_timeout_minutes * 60))
        .weights(weights);

    let mut lines = Vec::with_capacity(opts.drivers.len());
    for driver in &opts.drivers {
        let started_at = chrono::Utc::now().to_rfc3339();
        let outcome = runner
            .run_driver(driver)
            .with_context(|| format!("Failed to analyze {}", driver.display()))?;
        if let Some(result) = &outcome.result {
            let mut record = run_record(driver, driver, result, started_at);
            record.weight_bonus = outcome.weight_bonus;
            results_db.insert_run(&record, result).context("Failed to store batch result")?;
        }
        lines.push(BatchLine {
            driver: driver.display().to_string(),
            ret_code: outcome.result.as_ref().map(|r| r.ret_code),
            timed_out: outcome.timed_out,
            weight_bonus: outcome.weight_bonus,
        });
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(());
    }
    println!("Batch results:");
    for line in &lines {
        match line.ret_code {
            Some(code) => println!("- {}: {} (bonus {})", line.driver, code, line.weight_bonus),
            None => println!("- {}: timed out", line.driver),
        }
    }
    Ok(())
}
