// crates/loadgen-cli/src/main.rs
// ============================================================================
// Module: Loadgen CLI Entry Point
// Description: Command dispatcher for single runs, matrices, and analysis.
// Purpose: Bridge command-line flags and config files onto the loadgen crates.
// Dependencies: clap, loadgen-client, loadgen-config, loadgen-core, loadgen-matrix,
//               thiserror, tokio, tracing-subscriber
// ============================================================================

//! ## Overview
//! `loadgen run` executes one workload against the store under test and
//! writes its JSON report. `loadgen matrix` sweeps a configuration matrix by
//! re-invoking this binary once per cell. `loadgen analyze` loads the latest
//! matrix results and prints the scaling tables. Logs go to stderr through
//! `tracing-subscriber` (`RUST_LOG`, default `info`); results go to stdout.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use loadgen_client::ClientSettings;
use loadgen_client::TcpStoreConnector;
use loadgen_config::ConfigError;
use loadgen_config::LoadgenConfig;
use loadgen_config::RunOverrides;
use loadgen_core::CrudMix;
use loadgen_core::RunError;
use loadgen_core::RunReport;
use loadgen_core::run_workload;
use loadgen_core::time::as_millis_f64;
use loadgen_matrix::Analysis;
use loadgen_matrix::MatrixError;
use loadgen_matrix::MatrixRunner;
use loadgen_matrix::MatrixSettings;
use loadgen_matrix::ProcessLauncher;
use loadgen_matrix::WorkloadArgs;
use loadgen_matrix::generate_configurations;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "loadgen", version, disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one workload against the store under test.
    Run(RunCommand),
    /// Sweep a database x connection x worker matrix, one run per cell.
    Matrix(MatrixCommand),
    /// Print scaling tables for the latest matrix results.
    Analyze(AnalyzeCommand),
}

/// Arguments for the `run` command.
#[derive(Args, Debug, Default)]
struct RunCommand {
    /// Optional config file path (defaults to loadgen.toml or `LOADGEN_CONFIG`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Comma-separated database names, replacing `[[databases]]`.
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    databases: Option<Vec<String>>,
    /// Workers per database.
    #[arg(long, value_name = "N")]
    workers: Option<u32>,
    /// Connections per database.
    #[arg(long, value_name = "N")]
    connections: Option<u32>,
    /// Run length in seconds.
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,
    /// JSON report path.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// CRUD percentages as create,read,update,delete.
    #[arg(long, value_name = "C,R,U,D", value_parser = parse_crud)]
    crud: Option<CrudMix>,
    /// Bytes per generated payload.
    #[arg(long, value_name = "BYTES")]
    doc_size: Option<usize>,
    /// Size of the document id space.
    #[arg(long, value_name = "N")]
    doc_count: Option<u64>,
    /// Root directory holding per-database WAL files.
    #[arg(long, value_name = "DIR")]
    wal_dir: Option<PathBuf>,
    /// Store address as host:port.
    #[arg(long = "store", value_name = "ADDR")]
    store_address: Option<String>,
}

/// Arguments for the `matrix` command.
#[derive(Args, Debug, Default)]
struct MatrixCommand {
    /// Optional config file path, also passed to every cell.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Database counts to sweep.
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    databases: Option<Vec<u32>>,
    /// Connections-per-database values to sweep.
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    connections: Option<Vec<u32>>,
    /// Workers-per-database values to sweep.
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    workers: Option<Vec<u32>>,
    /// Directory receiving reports, logs, results.db, and summary.md.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
    /// Run length per cell in seconds.
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,
    /// Call the store restart hook between cells.
    #[arg(long, action = ArgAction::SetTrue)]
    restart_server: bool,
    /// Skip writing results.db.
    #[arg(long, action = ArgAction::SetTrue)]
    no_persist: bool,
    /// Skip writing summary.md.
    #[arg(long, action = ArgAction::SetTrue)]
    no_summary: bool,
    /// CRUD percentages passed to every cell.
    #[arg(long, value_name = "C,R,U,D", value_parser = parse_crud)]
    crud: Option<CrudMix>,
    /// Payload size passed to every cell.
    #[arg(long, value_name = "BYTES")]
    doc_size: Option<usize>,
    /// Document id space passed to every cell.
    #[arg(long, value_name = "N")]
    doc_count: Option<u64>,
}

/// Arguments for the `analyze` command.
#[derive(Args, Debug, Default)]
struct AnalyzeCommand {
    /// Optional config file path used to find the matrix output directory.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Matrix output directory (overrides `[matrix].output_dir`).
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The workload run failed.
    #[error(transparent)]
    Run(#[from] RunError),
    /// The matrix or analysis failed.
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    /// Anything else, already formatted.
    #[error("{0}")]
    Message(String),
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(command) => command_run(command).await,
        Commands::Matrix(command) => command_matrix(command).await,
        Commands::Analyze(command) => command_analyze(&command),
    };
    match result {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Installs the stderr log subscriber.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

// ============================================================================
// SECTION: Run
// ============================================================================

impl RunCommand {
    /// Flag values as config overrides.
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            databases: self.databases.clone(),
            workers: self.workers,
            connections: self.connections,
            duration_secs: self.duration,
            crud: self.crud,
            doc_size: self.doc_size,
            doc_count: self.doc_count,
            output: self.output.clone(),
            wal_dir: self.wal_dir.clone(),
            store_address: self.store_address.clone(),
        }
    }
}

/// Resolves the effective configuration for a single run.
fn resolve_run_config(command: &RunCommand) -> CliResult<LoadgenConfig> {
    let mut config = LoadgenConfig::load_or_default(command.config.as_deref())?;
    command.overrides().apply(&mut config)?;
    Ok(config)
}

/// Executes `loadgen run`.
async fn command_run(command: RunCommand) -> CliResult<ExitCode> {
    let config = resolve_run_config(&command)?;
    let settings = config.run_settings()?;
    let client = ClientSettings {
        connect_timeout: config.store.connect_timeout(),
        request_timeout: config.store.request_timeout(),
        max_frame_bytes: config.store.max_frame_bytes,
    };
    let connector = TcpStoreConnector::new(config.store.address.clone(), client);
    info!(
        store = %config.store.address,
        databases = settings.databases.len(),
        duration_secs = config.run.duration_secs,
        "starting run"
    );
    let report = run_workload(settings, Arc::new(connector)).await?;
    if let Some(output) = &config.run.output {
        report.write_json(output)?;
        info!(path = %output.display(), "report written");
    }
    write_stdout(&render_report(&report))?;
    Ok(ExitCode::SUCCESS)
}

/// Renders a run report as plain text.
fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let global = &report.metrics.global;
    let _ = writeln!(
        out,
        "total ops {}  errors {}  throughput {:.2} ops/s  p95 {:.3} ms  p99 {:.3} ms",
        global.total_operations,
        global.total_errors,
        global.throughput,
        report.p95_ms(),
        report.p99_ms()
    );
    for (operation, latency) in &global.operations {
        let _ = writeln!(
            out,
            "  {:<6} count {:>8}  errors {:>6}  mean {:.3} ms  p95 {:.3} ms  p99 {:.3} ms",
            operation.as_str(),
            latency.stats.count,
            latency.errors,
            as_millis_f64(latency.stats.mean),
            as_millis_f64(latency.stats.p95),
            as_millis_f64(latency.stats.p99),
        );
    }
    for database in &report.metrics.databases {
        let _ = writeln!(
            out,
            "{}: ops {}  errors {}  throughput {:.2} ops/s  wal growth {} bytes  healing overhead {:.2}%",
            database.name,
            database.total_operations,
            database.total_errors,
            database.throughput,
            database.wal.growth_bytes,
            database.healing.overhead_percent,
        );
    }
    for (phase, count) in &report.metrics.phases {
        let _ = writeln!(out, "phase {phase}: {count} ops");
    }
    out.trim_end().to_string()
}

// ============================================================================
// SECTION: Matrix
// ============================================================================

/// Resolves matrix settings and axes from the config file and flags.
fn resolve_matrix(command: &MatrixCommand) -> CliResult<(MatrixSettings, LoadgenConfig)> {
    let mut config = LoadgenConfig::load_or_default(command.config.as_deref())?;
    let matrix = &mut config.matrix;
    if let Some(databases) = &command.databases {
        matrix.databases.clone_from(databases);
    }
    if let Some(connections) = &command.connections {
        matrix.connections.clone_from(connections);
    }
    if let Some(workers) = &command.workers {
        matrix.workers.clone_from(workers);
    }
    if let Some(output_dir) = &command.output_dir {
        matrix.output_dir.clone_from(output_dir);
    }
    if let Some(duration) = command.duration {
        matrix.duration_secs = duration;
    }
    matrix.restart_server |= command.restart_server;
    matrix.persist_results &= !command.no_persist;
    matrix.write_summary &= !command.no_summary;
    config.validate()?;

    let matrix = &config.matrix;
    let settings = MatrixSettings {
        output_dir: matrix.output_dir.clone(),
        duration_secs: matrix.duration_secs,
        restart_server: matrix.restart_server,
        persist_results: matrix.persist_results,
        write_summary: matrix.write_summary,
        workload: WorkloadArgs {
            crud: command.crud,
            doc_size: command.doc_size,
            doc_count: command.doc_count,
        },
    };
    Ok((settings, config))
}

/// Executes `loadgen matrix`.
async fn command_matrix(command: MatrixCommand) -> CliResult<ExitCode> {
    let (settings, config) = resolve_matrix(&command)?;
    let configurations = generate_configurations(
        &config.matrix.databases,
        &config.matrix.connections,
        &config.matrix.workers,
    );
    let program = std::env::current_exe()
        .map_err(|err| CliError::Message(format!("cannot locate loadgen binary: {err}")))?;
    let mut launcher = ProcessLauncher::new(program);
    if let Some(path) = &command.config {
        launcher = launcher.with_config(path);
    }
    let runner = MatrixRunner::new(settings, Box::new(launcher));
    let summary = tokio::task::spawn_blocking(move || runner.run(&configurations))
        .await
        .map_err(|err| CliError::Message(format!("matrix task failed: {err}")))??;

    write_stdout(&format!(
        "{} configurations: {} succeeded, {} failed; results in {}",
        summary.outcomes.len(),
        summary.success_count(),
        summary.fail_count(),
        summary.output_dir.display()
    ))?;
    if summary.fail_count() > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Analyze
// ============================================================================

/// Directory the `analyze` command reads.
fn resolve_analyze_dir(command: &AnalyzeCommand) -> CliResult<PathBuf> {
    if let Some(dir) = &command.dir {
        return Ok(dir.clone());
    }
    let config = LoadgenConfig::load_or_default(command.config.as_deref())?;
    Ok(config.matrix.output_dir)
}

/// Executes `loadgen analyze`.
fn command_analyze(command: &AnalyzeCommand) -> CliResult<ExitCode> {
    let dir = resolve_analyze_dir(command)?;
    let analysis = Analysis::load(&dir)?;
    write_stdout(analysis.render().trim_end())?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses `create,read,update,delete` percentages.
fn parse_crud(value: &str) -> Result<CrudMix, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [create, read, update, delete] = parts.as_slice() else {
        return Err("expected four comma-separated percentages".to_string());
    };
    CrudMix::new(
        parse_percentage(create)?,
        parse_percentage(read)?,
        parse_percentage(update)?,
        parse_percentage(delete)?,
    )
    .map_err(|err| err.to_string())
}

/// Parses one percentage.
fn parse_percentage(part: &str) -> Result<u32, String> {
    part.parse::<u32>().map_err(|_| format!("invalid percentage: {part}"))
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
        .map_err(|err| CliError::Message(format!("failed to write stdout: {err}")))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
