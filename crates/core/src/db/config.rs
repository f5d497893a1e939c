use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::EngineConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML config {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse JSON config {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Location of the result database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    /// Path to the database file, relative to the work directory unless absolute.
    pub path: String,
}

impl DbConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::new("pathfinder.db")
    }
}

/// Top-level configuration shared by single-driver and batch runs.
///
/// Read from YAML (`.yaml`/`.yml`) or JSON (anything else). Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathfinderConfig {
    /// Format version of this file.
    pub config_version: String,
    pub db: DbConfig,
    /// Directory receiving result files, logs and the database.
    pub work_dir: Option<String>,
    /// Per-instance timeout unit; a batch child gets `instance * instance_timeout_minutes`.
    pub instance_timeout_minutes: u64,
    /// Interesting-function weight table applied by batch runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<String>,
    pub engine: EngineConfig,
}

impl Default for PathfinderConfig {
    fn default() -> Self {
        Self {
            config_version: "0.1.0".to_string(),
            db: DbConfig::default(),
            work_dir: None,
            instance_timeout_minutes: 30,
            weights: None,
            engine: EngineConfig::default(),
        }
    }
}

impl PathfinderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: display.clone(), source })?;
        if is_yaml(path) {
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml { path: display, source })
        } else {
            serde_json::from_str(&text).map_err(|source| ConfigError::Json { path: display, source })
        }
    }
}

pub(crate) fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("yaml" | "yml")
    )
}
