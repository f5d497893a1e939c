use std::path::{Path, PathBuf};

/// Where one work directory keeps its artifacts.
///
/// Pure path arithmetic; callers create directories and files.
#[derive(Debug, Clone)]
pub struct WorkLayout {
    /// Directory holding result files, logs and the database.
    pub work_dir: PathBuf,
    /// Path to the result database.
    pub db_path: PathBuf,
}

impl WorkLayout {
    /// Default layout rooted at `work_dir`, with the database at `pathfinder.db`.
    pub fn new(work_dir: impl AsRef<Path>) -> Self {
        let work_dir = work_dir.as_ref().to_path_buf();
        let db_path = work_dir.join("pathfinder.db");
        Self { work_dir, db_path }
    }

    /// Same layout with the database moved; relative paths resolve against the work directory.
    pub fn with_db_path(mut self, db_path: impl AsRef<Path>) -> Self {
        let db_path = db_path.as_ref();
        self.db_path =
            if db_path.is_absolute() { db_path.to_path_buf() } else { self.work_dir.join(db_path) };
        self
    }

    /// `<work>/<base>_ioctl_res.json`
    pub fn result_path(&self, driver: &Path) -> PathBuf {
        self.work_dir.join(format!("{}_ioctl_res.json", driver_base_name(driver)))
    }

    /// `<work>/<base>_pathfinder.log`
    pub fn log_path(&self, driver: &Path) -> PathBuf {
        self.work_dir.join(format!("{}_pathfinder.log", driver_base_name(driver)))
    }
}

/// File name without its last extension (`foo.sys` -> `foo`, `foo.sys.json` -> `foo.sys`).
pub fn driver_base_name(driver: &Path) -> String {
    driver
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "driver".to_string())
}
