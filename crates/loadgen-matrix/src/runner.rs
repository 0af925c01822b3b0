// crates/loadgen-matrix/src/runner.rs
// ============================================================================
// Module: Matrix Runner
// Description: Sequential execution of matrix cells with persisted results.
// Purpose: Run every cell in isolation and record each outcome.
// Dependencies: loadgen-core, loadgen-store-sqlite, tracing
// ============================================================================

//! ## Overview
//! [`MatrixRunner`] runs cells strictly one after another. Each cell gets
//! its own invocation and its own JSON report file. A failed cell is
//! recorded with its captured output, written to `{name}.log`, and the
//! runner moves on; only failures of the output directory or result store
//! stop the matrix. When a restart is requested, the restart hook runs
//! before every cell after the first.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use loadgen_core::RunReport;
use loadgen_core::time::unix_millis;
use loadgen_store_sqlite::ResultRecord;
use loadgen_store_sqlite::ResultStoreConfig;
use loadgen_store_sqlite::SqliteResultStore;
use tracing::info;
use tracing::warn;

use crate::MatrixError;
use crate::configuration::TestConfiguration;
use crate::launcher::ConfigurationLauncher;
use crate::launcher::LaunchRequest;
use crate::launcher::ServerRestart;
use crate::launcher::UnsupportedRestart;
use crate::launcher::WorkloadArgs;
use crate::summary::write_summary;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// File name of the human-readable summary.
pub const SUMMARY_FILE_NAME: &str = "summary.md";

/// Matrix-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixSettings {
    /// Directory receiving reports, logs, `results.db`, and `summary.md`.
    pub output_dir: PathBuf,
    /// Run length per cell in seconds.
    pub duration_secs: u64,
    /// Call the restart hook between cells.
    pub restart_server: bool,
    /// Persist results to `results.db`.
    pub persist_results: bool,
    /// Write `summary.md`.
    pub write_summary: bool,
    /// Workload parameters passed to every cell.
    pub workload: WorkloadArgs,
}

impl MatrixSettings {
    /// Settings for `output_dir` with persistence and summary enabled.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, duration_secs: u64) -> Self {
        Self {
            output_dir: output_dir.into(),
            duration_secs,
            restart_server: false,
            persist_results: true,
            write_summary: true,
            workload: WorkloadArgs::default(),
        }
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Outcome of one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationOutcome {
    /// Cell that ran.
    pub configuration: TestConfiguration,
    /// Unix milliseconds at launch.
    pub started_at: i64,
    /// Unix milliseconds at completion.
    pub finished_at: i64,
    /// Row written to the result store.
    pub record: ResultRecord,
    /// Captured output, kept for failed cells.
    pub output: Option<String>,
}

/// Outcome of a whole matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSummary {
    /// Result store run id, when persistence is enabled.
    pub run_id: Option<i64>,
    /// Output directory.
    pub output_dir: PathBuf,
    /// Unix milliseconds at start.
    pub started_at: i64,
    /// Unix milliseconds at finish.
    pub finished_at: i64,
    /// Per-cell outcomes in execution order.
    pub outcomes: Vec<ConfigurationOutcome>,
}

impl MatrixSummary {
    /// Cells that succeeded.
    #[must_use]
    pub fn success_count(&self) -> u32 {
        count_u32(self.outcomes.iter().filter(|outcome| outcome.record.success).count())
    }

    /// Cells that failed.
    #[must_use]
    pub fn fail_count(&self) -> u32 {
        count_u32(self.outcomes.iter().filter(|outcome| !outcome.record.success).count())
    }
}

/// Saturating `usize` to `u32`.
fn count_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// Builds a result row from a successful cell's report.
#[must_use]
pub fn record_from_report(name: &str, report: &RunReport, result_file: Option<&Path>) -> ResultRecord {
    ResultRecord {
        config_name: name.to_string(),
        databases: count_u32(report.databases.len()),
        connections_per_db: report.connections_per_db,
        workers_per_db: report.workers_per_db,
        duration_sec: report.duration_secs,
        total_ops: report.total_operations(),
        throughput: report.throughput(),
        p95_latency_ms: report.p95_ms(),
        p99_latency_ms: report.p99_ms(),
        success: true,
        result_file: result_file.map(|path| path.display().to_string()),
    }
}

/// Builds a result row for a failed cell.
fn failed_record(configuration: &TestConfiguration, duration_secs: u64) -> ResultRecord {
    ResultRecord {
        config_name: configuration.name.clone(),
        databases: configuration.databases,
        connections_per_db: configuration.connections_per_db,
        workers_per_db: configuration.workers_per_db,
        duration_sec: duration_f64(duration_secs),
        total_ops: 0,
        throughput: 0.0,
        p95_latency_ms: 0.0,
        p99_latency_ms: 0.0,
        success: false,
        result_file: None,
    }
}

/// Seconds as `f64`.
#[allow(clippy::cast_precision_loss, reason = "Run lengths are far below 2^52 seconds.")]
const fn duration_f64(secs: u64) -> f64 {
    secs as f64
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Sequential matrix runner.
pub struct MatrixRunner {
    /// Matrix-wide settings.
    settings: MatrixSettings,
    /// Cell executor.
    launcher: Box<dyn ConfigurationLauncher>,
    /// Restart hook.
    restart: Box<dyn ServerRestart>,
}

impl std::fmt::Debug for MatrixRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixRunner").field("settings", &self.settings).finish_non_exhaustive()
    }
}

impl MatrixRunner {
    /// Runner using `launcher` and the unsupported restart hook.
    #[must_use]
    pub fn new(settings: MatrixSettings, launcher: Box<dyn ConfigurationLauncher>) -> Self {
        Self {
            settings,
            launcher,
            restart: Box::new(UnsupportedRestart),
        }
    }

    /// Replaces the restart hook.
    #[must_use]
    pub fn with_restart(mut self, restart: Box<dyn ServerRestart>) -> Self {
        self.restart = restart;
        self
    }

    /// Matrix-wide settings.
    #[must_use]
    pub const fn settings(&self) -> &MatrixSettings {
        &self.settings
    }

    /// Runs every cell in order and records the results.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::Io`] when the output directory cannot be
    /// created and [`MatrixError::Store`] when the result store fails. Cell
    /// failures are recorded, not returned.
    pub fn run(&self, configurations: &[TestConfiguration]) -> Result<MatrixSummary, MatrixError> {
        let output_dir = &self.settings.output_dir;
        fs::create_dir_all(output_dir)
            .map_err(|err| MatrixError::Io(format!("{}: {err}", output_dir.display())))?;
        let store = if self.settings.persist_results {
            Some(SqliteResultStore::open(ResultStoreConfig::in_output_dir(output_dir))?)
        } else {
            None
        };
        let started_at = unix_millis();
        let run_id = match &store {
            Some(store) => {
                Some(store.begin_run(output_dir, started_at, count_u32(configurations.len()))?)
            }
            None => None,
        };
        info!(
            configurations = configurations.len(),
            output_dir = %output_dir.display(),
            "matrix started"
        );

        let mut outcomes = Vec::with_capacity(configurations.len());
        for (index, configuration) in configurations.iter().enumerate() {
            if self.settings.restart_server && index > 0 {
                self.restart_between_cells(&configuration.name);
            }
            let outcome = self.run_one(configuration);
            if let (Some(store), Some(run_id)) = (&store, run_id) {
                store.record_result(run_id, &outcome.record)?;
            }
            outcomes.push(outcome);
        }

        let summary = MatrixSummary {
            run_id,
            output_dir: output_dir.clone(),
            started_at,
            finished_at: unix_millis(),
            outcomes,
        };
        if let (Some(store), Some(run_id)) = (&store, run_id) {
            store.finish_run(run_id, summary.finished_at, summary.success_count(), summary.fail_count())?;
        }
        if self.settings.write_summary {
            write_summary(&output_dir.join(SUMMARY_FILE_NAME), &summary)?;
        }
        info!(
            succeeded = summary.success_count(),
            failed = summary.fail_count(),
            "matrix complete"
        );
        Ok(summary)
    }

    /// Invokes the restart hook; failures are logged and ignored.
    fn restart_between_cells(&self, next: &str) {
        match self.restart.restart() {
            Ok(()) => info!(config = next, "store restarted"),
            Err(MatrixError::RestartNotImplemented) => {
                warn!(config = next, "store restart requested but not implemented");
            }
            Err(err) => warn!(config = next, error = %err, "store restart failed"),
        }
    }

    /// Runs one cell and converts its result.
    fn run_one(&self, configuration: &TestConfiguration) -> ConfigurationOutcome {
        let result_file = self.settings.output_dir.join(format!("{}.json", configuration.name));
        let request = LaunchRequest {
            configuration,
            duration_secs: self.settings.duration_secs,
            result_file: &result_file,
            workload: &self.settings.workload,
        };
        let started_at = unix_millis();
        info!(config = %configuration.name, "configuration started");
        let launched = self.launcher.launch(&request);
        let finished_at = unix_millis();

        let failure = match launched {
            Ok(outcome) if outcome.success => match RunReport::read_json(&result_file) {
                Ok(report) => {
                    info!(
                        config = %configuration.name,
                        total_ops = report.total_operations(),
                        throughput = report.throughput(),
                        "configuration succeeded"
                    );
                    return ConfigurationOutcome {
                        configuration: configuration.clone(),
                        started_at,
                        finished_at,
                        record: record_from_report(&configuration.name, &report, Some(&result_file)),
                        output: None,
                    };
                }
                Err(err) => format!("{}\nresult file unreadable: {err}", outcome.output),
            },
            Ok(outcome) => outcome.output,
            Err(err) => err.to_string(),
        };
        warn!(config = %configuration.name, "configuration failed");
        self.write_failure_log(&configuration.name, &failure);
        ConfigurationOutcome {
            configuration: configuration.clone(),
            started_at,
            finished_at,
            record: failed_record(configuration, self.settings.duration_secs),
            output: Some(failure),
        }
    }

    /// Writes captured output next to the cell's report.
    fn write_failure_log(&self, name: &str, output: &str) {
        let path = self.settings.output_dir.join(format!("{name}.log"));
        if let Err(err) = fs::write(&path, output) {
            warn!(path = %path.display(), error = %err, "failed to write configuration log");
        }
    }
}
