//! SketchLoop - model-guided Arduino sensor exploration
//!
//! CLI entry point with global panic handler.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sketchloop::config::{crash_log_path, Config};
use sketchloop::error::exit_codes;
use sketchloop::storage::{FileVersionStore, TrainingLog};

// =============================================================================
// CLI Definition
// =============================================================================

/// SketchLoop - model-guided Arduino sensor exploration
#[derive(Parser)]
#[command(name = "sketchloop")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an exploration session against a connected board
    Run {
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
        /// Serial device (default: config, then auto-detect)
        #[arg(long, short)]
        port: Option<PathBuf>,
        /// Save builds without compiling or uploading
        #[arg(long)]
        no_flash: bool,
        /// Accept hardware-change instructions without waiting for Enter
        #[arg(long)]
        auto_ack: bool,
    },

    /// Print the sketch generated for a sensor list
    Render {
        /// Sensor identifiers, e.g. temperature light motion
        sensors: Vec<String>,
        /// Logic fragment for the main loop
        #[arg(long)]
        logic: Option<String>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// List saved firmware versions
    History {
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
        /// Show only the most recent N versions
        #[arg(long, short)]
        limit: Option<usize>,
    },

    /// Show one saved firmware version
    Show {
        /// Version number (default: latest)
        version: Option<u64>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Summarize saved training entries
    Training {
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
        /// Number of recent entries to include
        #[arg(long, short)]
        limit: Option<usize>,
    },
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> ExitCode {
    setup_panic_handler();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("sketchloop error: {}", e);
            ExitCode::from(exit_codes::ERROR as u8)
        }
    }
}

/// Set up the global panic handler.
///
/// On panic, logs to ~/.sketchloop/crash.log and exits with code 3.
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("sketchloop panic: {}", info);

        if let Some(crash_log) = crash_log_path() {
            if let Some(parent) = crash_log.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&crash_log)
            {
                let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
                let _ = writeln!(file, "[{}] {}", timestamp, info);
            }
        }

        std::process::exit(exit_codes::CRASH);
    }));
}

/// Logs go to stderr so JSON output on stdout stays parseable.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "sketchloop=debug"
    } else {
        "sketchloop=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Run the CLI and return the exit code.
fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Run {
            json,
            quiet,
            cycles,
            port,
            no_flash,
            auto_ack,
        } => run_session(json, quiet, cycles, port, no_flash, auto_ack, &cwd),
        Commands::Render {
            sensors,
            logic,
            json,
            quiet,
        } => run_render(sensors, logic, json, quiet),
        Commands::History { json, quiet, limit } => run_history(json, quiet, limit, &cwd),
        Commands::Show {
            version,
            json,
            quiet,
        } => run_show(version, json, quiet, &cwd),
        Commands::Training { json, quiet, limit } => run_training(json, quiet, limit, &cwd),
    }
}

// =============================================================================
// Command Implementations
// =============================================================================

/// Convert a success boolean to an exit code.
fn success_to_exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::from(exit_codes::SUCCESS as u8)
    } else {
        ExitCode::from(exit_codes::ERROR as u8)
    }
}

fn run_session(
    json: bool,
    quiet: bool,
    cycles: Option<u64>,
    port: Option<PathBuf>,
    no_flash: bool,
    auto_ack: bool,
    cwd: &Path,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use sketchloop::cli::run::{RunCommand, RunOptions};

    let config = Config::load_from_cwd(cwd);

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, finishing current step");
        flag.store(true, Ordering::SeqCst);
    })?;

    let cmd = RunCommand::new(config, cwd).with_stop_flag(stop);
    let options = RunOptions {
        json,
        quiet,
        cycles,
        port,
        no_flash,
        auto_ack,
    };

    let output = cmd.run(&options);
    let formatted = cmd.format_output(&output, &options);

    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    if output.link_failure {
        return Ok(ExitCode::from(exit_codes::LINK_FAILURE as u8));
    }
    Ok(success_to_exit_code(output.success))
}

fn run_render(
    sensors: Vec<String>,
    logic: Option<String>,
    json: bool,
    quiet: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use sketchloop::cli::render::{RenderCommand, RenderOptions};

    let cmd = RenderCommand::new();
    let options = RenderOptions {
        json,
        quiet,
        sensors,
        logic,
    };

    let output = cmd.run(&options);
    let formatted = cmd.format_output(&output, &options);

    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(success_to_exit_code(output.success))
}

fn run_history(
    json: bool,
    quiet: bool,
    limit: Option<usize>,
    cwd: &Path,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use sketchloop::cli::history::{HistoryCommand, HistoryOptions};

    let config = Config::load_from_cwd(cwd);
    let store = FileVersionStore::open(config.firmware_dir(cwd))?;

    let cmd = HistoryCommand::new(store);
    let options = HistoryOptions { json, quiet, limit };

    let output = cmd.run(&options);
    let formatted = cmd.format_output(&output, &options);

    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(success_to_exit_code(output.success))
}

fn run_show(
    version: Option<u64>,
    json: bool,
    quiet: bool,
    cwd: &Path,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use sketchloop::cli::show::{ShowCommand, ShowOptions};

    let config = Config::load_from_cwd(cwd);
    let store = FileVersionStore::open(config.firmware_dir(cwd))?;

    let cmd = ShowCommand::new(store);
    let options = ShowOptions {
        json,
        quiet,
        version,
    };

    let output = cmd.run(&options);
    let formatted = cmd.format_output(&output, &options);

    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(success_to_exit_code(output.success))
}

fn run_training(
    json: bool,
    quiet: bool,
    limit: Option<usize>,
    cwd: &Path,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use sketchloop::cli::training::{TrainingCommand, TrainingOptions};

    let config = Config::load_from_cwd(cwd);
    let log = TrainingLog::open(config.training_dir(cwd))?;

    let cmd = TrainingCommand::new(log);
    let options = TrainingOptions { json, quiet, limit };

    let output = cmd.run(&options);
    let formatted = cmd.format_output(&output, &options);

    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(success_to_exit_code(output.success))
}

// =============================================================================
// Tests
// =============================================================================
