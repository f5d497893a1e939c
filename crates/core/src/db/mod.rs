//! Configuration, work-directory layout and the result database.
//!
//! - `PathfinderConfig`: file-backed settings, including the engine tunables.
//! - `WorkLayout`: where result files, logs and the database live.
//! - `ResultDb`: SQLite history of driver runs with schema migrations.

pub mod config;
pub mod context;
pub mod layout;
pub mod models;
pub mod results_db;
pub mod util;

pub use config::{ConfigError, DbConfig, PathfinderConfig};
pub use context::WorkContext;
pub use layout::{driver_base_name, WorkLayout};
pub use models::DriverRunRecord;
pub use results_db::{DbError, DbResult, ResultDb, CURRENT_SCHEMA_VERSION};
pub use util::{load_config_or_default, open_result_db};
