// crates/keel-cli/src/main.rs
// ============================================================================
// Module: Keel CLI Entry Point
// Description: Command dispatcher for the Keel demo workloads.
// Purpose: Run single, partitioned and thread-mode workloads and print JSON
//          reports.
// Dependencies: clap, keel-config, keel-cli, serde_json, thiserror,
//               tracing-subscriber
// ============================================================================

//! ## Overview
//! `keel` loads `keel.toml` (or the defaults), applies command-line overrides,
//! installs a `tracing` subscriber writing to stderr, runs one workload and
//! prints its report as JSON on stdout.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use keel_cli::workload;
use keel_config::KeelConfig;
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "keel", version, about = "Embedded SQLite coordination workloads")]
struct Cli {
    /// Configuration file (defaults to ./keel.toml when present).
    #[arg(long, global = true, env = "KEEL_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
    /// Log filter directive; overrides `[logging] filter`.
    #[arg(long, global = true, env = "KEEL_LOG", value_name = "FILTER")]
    log: Option<String>,
    /// Workload to run.
    #[command(subcommand)]
    command: Commands,
}

/// Workload commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Concurrent CRUD through one shared serialized handle.
    Single(SingleCommand),
    /// Parallel partition workloads plus distributed transactions.
    Multi(MultiCommand),
    /// Serialized versus per-thread unsynchronized handles.
    ThreadModes(ThreadModesCommand),
}

/// Workload sizing overrides shared by every command.
#[derive(Args, Debug, Clone, Copy, Default)]
struct WorkloadArgs {
    /// Worker threads; overrides `[workload] threads`.
    #[arg(long)]
    threads: Option<usize>,
    /// Operations per worker; overrides `[workload] operations`.
    #[arg(long)]
    operations: Option<usize>,
}

/// Arguments of `keel single`.
#[derive(Args, Debug)]
struct SingleCommand {
    /// Database file; overrides `[single] path`.
    #[arg(long, value_name = "PATH")]
    path: Option<PathBuf>,
    /// Workload sizing.
    #[command(flatten)]
    workload: WorkloadArgs,
}

/// Arguments of `keel multi`.
#[derive(Args, Debug)]
struct MultiCommand {
    /// Partition directory; overrides `[multi] directory`.
    #[arg(long, value_name = "DIR")]
    directory: Option<PathBuf>,
    /// Workload sizing.
    #[command(flatten)]
    workload: WorkloadArgs,
}

/// Arguments of `keel thread-modes`.
#[derive(Args, Debug)]
struct ThreadModesCommand {
    /// Directory for the two comparison files.
    #[arg(long, value_name = "DIR", default_value = ".")]
    directory: PathBuf,
    /// Workload sizing.
    #[command(flatten)]
    workload: WorkloadArgs,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a printable message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let mut config = KeelConfig::load(cli.config.as_deref())
        .map_err(|err| CliError::new(err.to_string()))?;
    apply_overrides(&mut config, &cli.command);
    config.validate().map_err(|err| CliError::new(err.to_string()))?;
    init_tracing(cli.log.as_deref().unwrap_or(&config.logging.filter))?;

    let tag = run_tag();
    match &cli.command {
        Commands::Single(_) => {
            let report = workload::run_single(
                &config.single.path,
                &config.single_connection(),
                config.workload,
                &tag,
            )
            .map_err(|err| CliError::new(format!("single workload failed: {err}")))?;
            write_json(&report)?;
        }
        Commands::Multi(_) => {
            let report = workload::run_multi(
                &config.multi,
                &config.multi_connection(),
                config.workload,
                &tag,
            )
            .map_err(|err| CliError::new(format!("multi workload failed: {err}")))?;
            write_json(&report)?;
        }
        Commands::ThreadModes(command) => {
            let report = workload::run_thread_modes(
                &command.directory,
                &config.connection,
                config.workload,
                &tag,
            )
            .map_err(|err| CliError::new(format!("thread-modes workload failed: {err}")))?;
            write_json(&report)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Applies command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut KeelConfig, command: &Commands) {
    let sizing = match command {
        Commands::Single(command) => {
            if let Some(path) = &command.path {
                config.single.path.clone_from(path);
            }
            command.workload
        }
        Commands::Multi(command) => {
            if let Some(directory) = &command.directory {
                config.multi.directory.clone_from(directory);
            }
            command.workload
        }
        Commands::ThreadModes(command) => command.workload,
    };
    if let Some(threads) = sizing.threads {
        config.workload.threads = threads;
    }
    if let Some(operations) = sizing.operations {
        config.workload.operations = operations;
    }
}

/// Installs the global `tracing` subscriber on stderr.
fn init_tracing(filter: &str) -> CliResult<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|err| CliError::new(format!("invalid log filter {filter}: {err}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|err| CliError::new(format!("cannot install log subscriber: {err}")))
}

/// Returns a tag unique to this invocation, used to keep record names
/// distinct across runs over the same files.
fn run_tag() -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    format!("run{nanos:x}")
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Writes a report as pretty JSON to stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("cannot serialize report: {err}")))?;
    write_stdout_line(&text).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
