use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::Level;

/// Environment variable overriding the log level (`error`, `warn`, `info`, `debug`, `trace`).
pub const LOG_ENV: &str = "PATHFINDER_LOG";

/// Level from `-v` count, unless the environment says otherwise.
pub fn resolve_level(verbose: u8) -> Level {
    if let Ok(value) = std::env::var(LOG_ENV) {
        if let Ok(level) = Level::from_str(value.trim()) {
            return level;
        }
    }
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber, writing to `log_file` when given and to stderr otherwise.
///
/// A log file records at least `info`; batch runs attach it to the result.
pub fn init_tracing(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let level = resolve_level(verbose);
    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            let _ = tracing_subscriber::fmt()
                .with_max_level(level.max(Level::INFO))
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
    Ok(())
}
