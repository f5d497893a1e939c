use std::path::Path;

use anyhow::{Context, Result};

use crate::db::{PathfinderConfig, ResultDb, WorkLayout};

/// Load the config at `path`, or defaults when no path is given.
pub fn load_config_or_default(path: Option<&Path>) -> Result<PathfinderConfig> {
    match path {
        Some(path) => PathfinderConfig::load(path)
            .with_context(|| format!("Failed to load config at {}", path.display())),
        None => Ok(PathfinderConfig::default()),
    }
}

/// Create the work directory if needed and open the result database inside it.
pub fn open_result_db(layout: &WorkLayout) -> Result<ResultDb> {
    std::fs::create_dir_all(&layout.work_dir).with_context(|| {
        format!("Failed to create work directory {}", layout.work_dir.display())
    })?;
    ResultDb::open(&layout.db_path)
        .with_context(|| format!("Failed to open result database at {}", layout.db_path.display()))
}
