use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pathfinder_cli::commands::*;
use pathfinder_cli::logging::init_tracing;

/// IOCTL handler discovery and path propagation for Windows kernel drivers.
///
/// Analysis runs over a driver database exported from the disassembler; the
/// batch command fans out one child process per driver and collects the results.
#[derive(Parser, Debug)]
#[command(
    name = "pathfinder",
    version,
    about = "IOCTL handler discovery and path propagation for Windows drivers",
    long_about = None
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one exported driver database and write `<driver>_ioctl_res.json`.
    ///
    /// The process exits with the analysis status: 0, 100 or 200 on success,
    /// a negative sentinel when the decompiler or WDF internals are unusable.
    Analyze {
        /// Exported driver database (JSON).
        database: PathBuf,

        /// Configuration file (YAML or JSON).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for result files and the result database.
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Result file path. Defaults to the work directory.
        #[arg(long)]
        output: Option<PathBuf>,

        /// PE image used to refine machine, entry point and imports.
        #[arg(long)]
        pe: Option<PathBuf>,

        /// Headless mode: load the decompiler plugin explicitly.
        #[arg(long, default_value_t = false)]
        batch: bool,

        /// Do not record the run in the result database.
        #[arg(long, default_value_t = false)]
        no_db: bool,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Analyze many drivers, each in its own child process with a timeout.
    Batch {
        /// Driver databases to analyze.
        #[arg(required = true)]
        drivers: Vec<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Instance number; scales the per-driver timeout. 0 disables it.
        #[arg(long, default_value_t = 1)]
        instance: u32,

        /// Interest weights file (CSV, YAML or JSON).
        #[arg(long)]
        weights: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the IOCTL comparisons of a result file.
    Comparisons {
        result: PathBuf,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the handler call trees of a result file.
    Tree {
        result: PathBuf,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Decode an IOCTL code into device type, function, method and access.
    Decode {
        /// IOCTL code, hex (`0x...`) or decimal.
        code: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Derive candidate IOCTL codes from the comparisons of a result file.
    Seeds {
        result: PathBuf,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Read PE headers and imports of a driver image.
    Probe {
        image: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List runs stored in the result database.
    History {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Only runs of this driver (file name).
        #[arg(long)]
        driver: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Command::Analyze { database, config, work_dir, output, pe, batch, no_db, json } => {
            let opts = AnalyzeOptions { database, config, work_dir, output, pe, batch, no_db, json };
            let code = analyze_command(&opts)?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Command::Batch { drivers, config, work_dir, instance, weights, json } => {
            let opts = BatchOptions { drivers, config, work_dir, instance, weights, json };
            batch_command(&opts)?
        }
        Command::Comparisons { result, json } => comparisons_command(&result, json)?,
        Command::Tree { result, json } => tree_command(&result, json)?,
        Command::Decode { code, json } => decode_command(&code, json)?,
        Command::Seeds { result, json } => seeds_command(&result, json)?,
        Command::Probe { image, config, json } => probe_command(&image, config.as_deref(), json)?,
        Command::History { config, work_dir, driver, json } => {
            history_command(config.as_deref(), work_dir.as_deref(), driver.as_deref(), json)?
        }
    }

    Ok(())
}
