use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pathfinder_core::backends::{FixtureDatabase, FixtureOracle};
use pathfinder_core::db::{open_result_db, DriverRunRecord, WorkContext};
use pathfinder_core::model::AnalysisResult;
use pathfinder_core::services::analysis::{finish_result, write_result_file};
use pathfinder_core::services::pe::probe_pe;
use pathfinder_core::services::DriverAnalyzer;

use crate::sha256_file;

/// Options of the `analyze` command.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub database: PathBuf,
    pub config: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    /// Result file; defaults to `<work>/<base>_ioctl_res.json`.
    pub output: Option<PathBuf>,
    /// PE image whose headers refine the exported database.
    pub pe: Option<PathBuf>,
    pub batch: bool,
    pub no_db: bool,
    pub json: bool,
}

/// Analyze one exported driver database. Returns the status code to exit with.
pub fn analyze_command(opts: &AnalyzeOptions) -> Result<i32> {
    let ctx = WorkContext::load(opts.config.as_deref(), opts.work_dir.as_deref())?;
    let started_at = chrono::Utc::now().to_rfc3339();

    let mut db = FixtureDatabase::load(&opts.database)
        .with_context(|| format!("Failed to load driver database {}", opts.database.display()))?;
    if let Some(pe_path) = &opts.pe {
        apply_pe_probe(pe_path, &ctx.config.engine.target_apis, &mut db)?;
    }

    let mut oracle = FixtureOracle::new(db);
    let outcome =
        DriverAnalyzer::new(&mut oracle, ctx.config.engine.clone()).batch_mode(opts.batch).run();
    let result = finish_result(outcome);

    let result_path = opts.output.clone().unwrap_or_else(|| ctx.layout.result_path(&opts.database));
    write_result_file(&result_path, &result)?;

    if !opts.no_db {
        let hashed = opts.pe.as_deref().unwrap_or(&opts.database);
        let record = run_record(&opts.database, hashed, &result, started_at);
        let results_db = open_result_db(&ctx.layout)?;
        results_db.insert_run(&record, &result).context("Failed to store analysis run")?;
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&opts.database, &result_path, &result);
    }
    Ok(result.ret_code)
}

pub fn run_record(driver: &Path, hashed: &Path, result: &AnalysisResult, started_at: String) -> DriverRunRecord {
    let mut record = DriverRunRecord::new(driver_label(driver), result.ret_code);
    record.driver_hash = sha256_file(hashed).ok();
    record.handler_type = result.handler_type;
    record.handler_count = result.handler_addrs.len();
    record.path_count = result.target_paths.len() + result.helper_paths.len();
    record.started_at = started_at;
    record
}

/// File name used as the driver key in the result database.
pub fn driver_label(driver: &Path) -> String {
    driver
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| driver.display().to_string())
}

fn apply_pe_probe(pe_path: &Path, target_apis: &[String], db: &mut FixtureDatabase) -> Result<()> {
    let summary = probe_pe(pe_path, target_apis)
        .with_context(|| format!("Failed to probe {}", pe_path.display()))?;
    summary.apply_to(db);
    Ok(())
}

fn print_summary(database: &Path, result_path: &Path, result: &AnalysisResult) {
    println!("Driver: {}", database.display());
    println!("  Status: {}", result.ret_code);
    println!("  Handler type: {}", result.handler_type);
    for addr in &result.handler_addrs {
        println!("  Handler: {addr:#x}");
    }
    println!("  Target paths: {}", result.target_paths.len());
    for path in &result.target_paths {
        println!("    - {} via {}", path.name, format_path(&path.path));
    }
    println!("  Helper paths: {}", result.helper_paths.len());
    for path in &result.helper_paths {
        println!("    - {} via {}", path.name, format_path(&path.path));
    }
    println!("  IOCTL comparisons: {}", result.ioctl_comp.len());
    if !result.wdf_functions.is_empty() {
        println!("  WDF functions: {}", result.wdf_functions.len());
        println!("  WDF debug build: {}", result.wdf_debug_build);
    }
    println!("  Result: {}", result_path.display());
}

pub fn format_path(path: &[u64]) -> String {
    path.iter().map(|a| format!("{a:#x}")).collect::<Vec<_>>().join(" -> ")
}
