// crates/loadgen-matrix/src/analysis.rs
// ============================================================================
// Module: Matrix Analysis
// Description: Latest-run loading and scaling slices over matrix results.
// Purpose: Turn persisted matrix rows into comparable scaling tables.
// Dependencies: loadgen-core, loadgen-store-sqlite, tracing
// ============================================================================

//! ## Overview
//! [`Analysis::load`] reads the latest run from `results.db` when the file
//! exists and holds a run. Otherwise it scans the directory for per-cell JSON
//! reports. Rows are then grouped into three fixed slices, each holding one
//! dimension variable and the other two at 1, plus the unfiltered table.
//!
//! # Invariants
//! - Slices contain successful rows only, ordered by the varying dimension.
//! - The full table keeps every row, including failures.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use loadgen_core::RunReport;
use loadgen_store_sqlite::RESULTS_DB_NAME;
use loadgen_store_sqlite::ResultRecord;
use loadgen_store_sqlite::ResultStoreConfig;
use loadgen_store_sqlite::SqliteResultStore;
use tracing::debug;
use tracing::warn;

use crate::MatrixError;
use crate::summary::format_unix_millis;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Where analyzed rows came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisSource {
    /// Latest run in a result store.
    Store {
        /// Store file.
        path: PathBuf,
        /// Run id that was loaded.
        run_id: i64,
        /// Unix milliseconds when the run started.
        started_at: i64,
    },
    /// Per-cell JSON reports found in a directory.
    Legacy {
        /// Report files that parsed, in row order.
        files: Vec<PathBuf>,
    },
}

/// One point of a scaling slice.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPoint {
    /// Value of the varying dimension.
    pub value: u32,
    /// Cell name.
    pub config_name: String,
    /// Operations issued.
    pub total_ops: u64,
    /// Operations per second.
    pub throughput: f64,
    /// 95th percentile latency in milliseconds.
    pub p95_latency_ms: f64,
    /// 99th percentile latency in milliseconds.
    pub p99_latency_ms: f64,
}

impl ScalingPoint {
    /// Point for `record` keyed by `value`.
    fn from_record(value: u32, record: &ResultRecord) -> Self {
        Self {
            value,
            config_name: record.config_name.clone(),
            total_ops: record.total_ops,
            throughput: record.throughput,
            p95_latency_ms: record.p95_latency_ms,
            p99_latency_ms: record.p99_latency_ms,
        }
    }
}

/// Loaded matrix results.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    /// Origin of the rows.
    source: AnalysisSource,
    /// Rows in storage order.
    rows: Vec<ResultRecord>,
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl Analysis {
    /// Analysis over explicit rows.
    #[must_use]
    pub const fn new(source: AnalysisSource, rows: Vec<ResultRecord>) -> Self {
        Self { source, rows }
    }

    /// Loads the latest results found in `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::Store`] when `results.db` exists but cannot be
    /// read, [`MatrixError::Io`] when the directory cannot be listed, and
    /// [`MatrixError::NoResults`] when neither source yields a row.
    pub fn load(output_dir: &Path) -> Result<Self, MatrixError> {
        let store_path = output_dir.join(RESULTS_DB_NAME);
        if store_path.is_file() {
            let store = SqliteResultStore::open_existing(ResultStoreConfig::new(&store_path))?;
            if let Some(stored) = store.latest_run()?
                && !stored.results.is_empty()
            {
                debug!(run_id = stored.run.id, rows = stored.results.len(), "loaded latest run");
                return Ok(Self::new(
                    AnalysisSource::Store {
                        path: store_path,
                        run_id: stored.run.id,
                        started_at: stored.run.started_at,
                    },
                    stored.results,
                ));
            }
        }
        Self::scan_reports(output_dir)
    }

    /// Builds rows from per-cell JSON reports in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::Io`] when the directory cannot be listed and
    /// [`MatrixError::NoResults`] when no report parses.
    pub fn scan_reports(dir: &Path) -> Result<Self, MatrixError> {
        let entries =
            fs::read_dir(dir).map_err(|err| MatrixError::Io(format!("{}: {err}", dir.display())))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut files = Vec::new();
        let mut rows = Vec::new();
        for path in paths {
            let Some(name) = path.file_stem().map(|stem| stem.to_string_lossy().into_owned()) else {
                continue;
            };
            match RunReport::read_json(&path) {
                Ok(report) => {
                    rows.push(crate::runner::record_from_report(&name, &report, Some(&path)));
                    files.push(path);
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable report"),
            }
        }
        if rows.is_empty() {
            return Err(MatrixError::NoResults(dir.display().to_string()));
        }
        Ok(Self::new(AnalysisSource::Legacy { files }, rows))
    }

    // ========================================================================
    // SECTION: Slices
    // ========================================================================

    /// Origin of the rows.
    #[must_use]
    pub const fn source(&self) -> &AnalysisSource {
        &self.source
    }

    /// Every row, failures included.
    #[must_use]
    pub fn full_table(&self) -> &[ResultRecord] {
        &self.rows
    }

    /// One database, one worker, varying connections.
    #[must_use]
    pub fn connection_scaling(&self) -> Vec<ScalingPoint> {
        self.slice(
            |row| row.databases == 1 && row.workers_per_db == 1,
            |row| row.connections_per_db,
        )
    }

    /// One database, one connection, varying workers.
    #[must_use]
    pub fn worker_scaling(&self) -> Vec<ScalingPoint> {
        self.slice(
            |row| row.databases == 1 && row.connections_per_db == 1,
            |row| row.workers_per_db,
        )
    }

    /// One connection, one worker, varying databases.
    #[must_use]
    pub fn database_scaling(&self) -> Vec<ScalingPoint> {
        self.slice(
            |row| row.connections_per_db == 1 && row.workers_per_db == 1,
            |row| row.databases,
        )
    }

    /// Successful rows matching `fixed`, keyed and sorted by `varying`.
    fn slice(
        &self,
        fixed: impl Fn(&ResultRecord) -> bool,
        varying: impl Fn(&ResultRecord) -> u32,
    ) -> Vec<ScalingPoint> {
        let mut points: Vec<ScalingPoint> = self
            .rows
            .iter()
            .filter(|row| row.success && fixed(row))
            .map(|row| ScalingPoint::from_record(varying(row), row))
            .collect();
        points.sort_by_key(|point| point.value);
        points
    }

    // ========================================================================
    // SECTION: Rendering
    // ========================================================================

    /// Renders every slice and the full table as aligned text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        match &self.source {
            AnalysisSource::Store { path, run_id, started_at } => {
                let _ = writeln!(
                    out,
                    "Run {run_id} from {} (started {})",
                    path.display(),
                    format_unix_millis(*started_at)
                );
            }
            AnalysisSource::Legacy { files } => {
                let _ = writeln!(out, "Legacy scan of {} report files", files.len());
            }
        }
        render_slice(&mut out, "Connection scaling (1 db, 1 worker)", "Conn/DB", &self.connection_scaling());
        render_slice(&mut out, "Worker scaling (1 db, 1 connection)", "Workers/DB", &self.worker_scaling());
        render_slice(&mut out, "Database scaling (1 connection, 1 worker)", "DBs", &self.database_scaling());

        let header = ["Configuration", "DBs", "Conn/DB", "Workers/DB", "Total Ops", "Ops/sec", "p95 ms", "p99 ms", "Status"];
        let body: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                vec![
                    row.config_name.clone(),
                    row.databases.to_string(),
                    row.connections_per_db.to_string(),
                    row.workers_per_db.to_string(),
                    row.total_ops.to_string(),
                    format!("{:.2}", row.throughput),
                    format!("{:.3}", row.p95_latency_ms),
                    format!("{:.3}", row.p99_latency_ms),
                    if row.success { "ok".to_string() } else { "failed".to_string() },
                ]
            })
            .collect();
        let _ = writeln!(out, "\nAll configurations");
        write_table(&mut out, &header, &body);
        out
    }
}

/// Appends one titled slice table.
fn render_slice(out: &mut String, title: &str, dimension: &str, points: &[ScalingPoint]) {
    let _ = writeln!(out, "\n{title}");
    if points.is_empty() {
        let _ = writeln!(out, "  (no matching configurations)");
        return;
    }
    let header = [dimension, "Configuration", "Total Ops", "Ops/sec", "p95 ms", "p99 ms"];
    let body: Vec<Vec<String>> = points
        .iter()
        .map(|point| {
            vec![
                point.value.to_string(),
                point.config_name.clone(),
                point.total_ops.to_string(),
                format!("{:.2}", point.throughput),
                format!("{:.3}", point.p95_latency_ms),
                format!("{:.3}", point.p99_latency_ms),
            ]
        })
        .collect();
    write_table(out, &header, &body);
}

/// Appends a table whose columns are padded to their widest cell.
fn write_table(out: &mut String, header: &[&str], body: &[Vec<String>]) {
    let mut widths: Vec<usize> = header.iter().map(|cell| cell.len()).collect();
    for row in body {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    let header_cells: Vec<String> = header.iter().map(|cell| (*cell).to_string()).collect();
    write_row(out, &widths, &header_cells);
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    write_row(out, &widths, &rule);
    for row in body {
        write_row(out, &widths, row);
    }
}

/// Appends one padded row.
fn write_row(out: &mut String, widths: &[usize], cells: &[String]) {
    let line: Vec<String> =
        widths.iter().zip(cells).map(|(&width, cell)| format!("{cell:<width$}")).collect();
    let _ = writeln!(out, "  {}", line.join("  ").trim_end());
}
