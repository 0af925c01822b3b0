// crates/loadgen-matrix/src/launcher.rs
// ============================================================================
// Module: Configuration Launcher
// Description: Runs one matrix cell as an isolated invocation.
// Purpose: Separate how a cell is executed from how the matrix is sequenced.
// Dependencies: loadgen-core, std::process
// ============================================================================

//! ## Overview
//! [`ConfigurationLauncher`] executes one cell and reports success plus the
//! combined output. [`ProcessLauncher`] spawns the `loadgen run` subcommand
//! with every workload parameter on the command line and waits for it; the
//! exit status decides success. [`ServerRestart`] is the hook called between
//! cells when a restart is requested; [`UnsupportedRestart`] declares it
//! without implementing it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;

use loadgen_core::CrudMix;

use crate::MatrixError;
use crate::configuration::TestConfiguration;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Workload parameters shared by every cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadArgs {
    /// CRUD percentages, when overriding the config file.
    pub crud: Option<CrudMix>,
    /// Bytes per payload, when overriding the config file.
    pub doc_size: Option<usize>,
    /// Document id space, when overriding the config file.
    pub doc_count: Option<u64>,
}

/// Everything one invocation needs.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    /// Cell to run.
    pub configuration: &'a TestConfiguration,
    /// Run length in seconds.
    pub duration_secs: u64,
    /// Where the invocation writes its JSON report.
    pub result_file: &'a Path,
    /// Shared workload parameters.
    pub workload: &'a WorkloadArgs,
}

/// Exit status and captured output of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Whether the invocation exited successfully.
    pub success: bool,
    /// Combined stdout and stderr.
    pub output: String,
}

// ============================================================================
// SECTION: Traits
// ============================================================================

/// Executes one matrix cell.
pub trait ConfigurationLauncher: Send + Sync {
    /// Runs the cell to completion.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::Launch`] when the invocation cannot start.
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<LaunchOutcome, MatrixError>;
}

/// Restarts the store under test between cells.
pub trait ServerRestart: Send + Sync {
    /// Restarts the store.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::RestartNotImplemented`] when the capability is
    /// declared but unavailable.
    fn restart(&self) -> Result<(), MatrixError>;
}

/// Restart hook that is declared but not implemented.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedRestart;

impl ServerRestart for UnsupportedRestart {
    fn restart(&self) -> Result<(), MatrixError> {
        Err(MatrixError::RestartNotImplemented)
    }
}

// ============================================================================
// SECTION: Process Launcher
// ============================================================================

/// Launches each cell as a `loadgen run` subprocess.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    /// Program to execute.
    program: PathBuf,
    /// Arguments placed after `run` and before the cell arguments.
    leading_args: Vec<String>,
}

impl ProcessLauncher {
    /// Launcher for `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Passes `--config path` to every invocation.
    #[must_use]
    pub fn with_config(mut self, path: &Path) -> Self {
        self.leading_args.push("--config".to_string());
        self.leading_args.push(path.display().to_string());
        self
    }

    /// Program path.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Full argument list for one invocation.
    #[must_use]
    pub fn command_args(&self, request: &LaunchRequest<'_>) -> Vec<String> {
        let configuration = request.configuration;
        let mut args = vec!["run".to_string()];
        args.extend(self.leading_args.iter().cloned());
        args.extend([
            "--databases".to_string(),
            configuration.database_names().join(","),
            "--workers".to_string(),
            configuration.workers_per_db.to_string(),
            "--connections".to_string(),
            configuration.connections_per_db.to_string(),
            "--duration".to_string(),
            request.duration_secs.to_string(),
            "--output".to_string(),
            request.result_file.display().to_string(),
        ]);
        if let Some(mix) = request.workload.crud {
            args.push("--crud".to_string());
            args.push(format!("{},{},{},{}", mix.create, mix.read, mix.update, mix.delete));
        }
        if let Some(doc_size) = request.workload.doc_size {
            args.push("--doc-size".to_string());
            args.push(doc_size.to_string());
        }
        if let Some(doc_count) = request.workload.doc_count {
            args.push("--doc-count".to_string());
            args.push(doc_count.to_string());
        }
        args
    }
}

impl ConfigurationLauncher for ProcessLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<LaunchOutcome, MatrixError> {
        let output = Command::new(&self.program)
            .args(self.command_args(request))
            .stdin(Stdio::null())
            .output()
            .map_err(|err| {
                MatrixError::Launch(format!("failed to spawn {}: {err}", self.program.display()))
            })?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(LaunchOutcome {
            success: output.status.success(),
            output: combined,
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
