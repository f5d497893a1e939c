//! Batch execution: one child process per driver, bounded by a per-instance timeout.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::db::WorkLayout;
use crate::model::AnalysisResult;
use crate::services::analysis::read_result_file;
use crate::services::weights::InterestWeights;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for analysis of {driver}: {source}")]
    Wait {
        driver: String,
        #[source]
        source: std::io::Error,
    },
}

/// What happened to one driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOutcome {
    pub driver: PathBuf,
    /// `None` when the child was killed on timeout.
    pub result: Option<AnalysisResult>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub weight_bonus: i64,
}

/// Runs `<program> analyze` for each driver and collects the result files. The caller stores
/// the runs, so children are started with `--no-db`.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    program: PathBuf,
    layout: WorkLayout,
    config_path: Option<PathBuf>,
    instance: u32,
    timeout_unit: Duration,
    weights: Option<InterestWeights>,
    poll_interval: Duration,
}

impl BatchRunner {
    pub fn new(program: impl Into<PathBuf>, layout: WorkLayout) -> Self {
        Self {
            program: program.into(),
            layout,
            config_path: None,
            instance: 0,
            timeout_unit: Duration::from_secs(30 * 60),
            weights: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn instance(mut self, instance: u32) -> Self {
        self.instance = instance;
        self
    }

    pub fn timeout_unit(mut self, unit: Duration) -> Self {
        self.timeout_unit = unit;
        self
    }

    pub fn weights(mut self, weights: Option<InterestWeights>) -> Self {
        self.weights = weights;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// `instance * unit`; instance 0 runs without a limit.
    pub fn timeout(&self) -> Option<Duration> {
        (self.instance > 0).then(|| self.timeout_unit * self.instance)
    }

    pub fn layout(&self) -> &WorkLayout {
        &self.layout
    }

    pub fn run_all<'a>(&self, drivers: impl IntoIterator<Item = &'a Path>) -> Vec<Result<DriverOutcome, RunnerError>> {
        drivers.into_iter().map(|driver| self.run_driver(driver)).collect()
    }

    pub fn run_driver(&self, driver: &Path) -> Result<DriverOutcome, RunnerError> {
        let result_path = self.layout.result_path(driver);
        let log_path = self.layout.log_path(driver);
        // A stale result from an earlier run must not be mistaken for this one.
        let _ = std::fs::remove_file(&result_path);

        let mut command = Command::new(&self.program);
        command
            .arg("analyze")
            .arg(driver)
            .arg("--batch")
            .arg("--no-db")
            .arg("--work-dir")
            .arg(&self.layout.work_dir)
            .arg("--log-file")
            .arg(&log_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(config) = &self.config_path {
            command.arg("--config").arg(config);
        }

        tracing::info!(driver = %driver.display(), timeout = ?self.timeout(), "starting analysis");
        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        let wait_error = |source| RunnerError::Wait { driver: driver.display().to_string(), source };

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().map_err(wait_error)? {
                break Some(status);
            }
            if self.timeout().is_some_and(|limit| started.elapsed() >= limit) {
                tracing::warn!(driver = %driver.display(), elapsed = ?started.elapsed(), "analysis timed out");
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            std::thread::sleep(self.poll_interval);
        };

        let Some(status) = status else {
            return Ok(DriverOutcome {
                driver: driver.to_path_buf(),
                result: None,
                exit_code: None,
                timed_out: true,
                weight_bonus: 0,
            });
        };

        let exit_code = status.code().map(decode_exit_code);
        let mut result = match read_result_file(&result_path) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(driver = %driver.display(), error = %err, "no result file, using exit status");
                AnalysisResult::failed(exit_code.unwrap_or(-1))
            }
        };
        let weight_bonus = self.weights.as_ref().map_or(0, |w| w.apply(&mut result));
        match std::fs::read_to_string(&log_path) {
            Ok(log) => result.analysis_log = Some(log),
            Err(err) => tracing::debug!(log = %log_path.display(), %err, "analysis log missing"),
        }
        tracing::info!(driver = %driver.display(), ret_code = result.ret_code, weight_bonus, "analysis done");

        Ok(DriverOutcome {
            driver: driver.to_path_buf(),
            result: Some(result),
            exit_code,
            timed_out: false,
            weight_bonus,
        })
    }
}

/// Undo the 8-bit wrap of the negative sentinel codes on Unix (`-3` arrives as `253`).
pub fn decode_exit_code(code: i32) -> i32 {
    match code {
        253..=255 => code - 256,
        other => other,
    }
}
