use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::db::{load_config_or_default, PathfinderConfig, WorkLayout};

/// Config plus the layout it resolves to.
///
/// The work directory comes from the explicit override, then the config, then the current
/// directory.
#[derive(Debug, Clone)]
pub struct WorkContext {
    pub config: PathfinderConfig,
    pub layout: WorkLayout,
}

impl WorkContext {
    pub fn load(config_path: Option<&Path>, work_dir: Option<&Path>) -> Result<Self> {
        let config = load_config_or_default(config_path)?;
        Ok(Self::from_config(config, work_dir))
    }

    pub fn from_config(config: PathfinderConfig, work_dir: Option<&Path>) -> Self {
        let work_dir: PathBuf = match (work_dir, &config.work_dir) {
            (Some(dir), _) => dir.to_path_buf(),
            (None, Some(dir)) => PathBuf::from(dir),
            (None, None) => PathBuf::from("."),
        };
        let layout = WorkLayout::new(work_dir).with_db_path(&config.db.path);
        Self { config, layout }
    }
}
