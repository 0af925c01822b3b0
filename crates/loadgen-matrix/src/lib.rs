// crates/loadgen-matrix/src/lib.rs
// ============================================================================
// Module: Loadgen Matrix
// Description: Matrix generation, sequential execution, and result analysis.
// Purpose: Sweep database, connection, and worker counts in isolated runs.
// Dependencies: loadgen-core, loadgen-store-sqlite, thiserror, time, tracing
// ============================================================================

//! ## Overview
//! A matrix is the Cartesian product of database counts, connections per
//! database, and workers per database. [`generate_configurations`] expands
//! it, [`MatrixRunner`] executes each cell through a
//! [`ConfigurationLauncher`] and persists results to `results.db`, and
//! [`Analysis`] reloads the latest run and slices it into scaling tables.

pub mod analysis;
pub mod configuration;
pub mod launcher;
pub mod runner;
pub mod summary;

use loadgen_store_sqlite::ResultStoreError;
use thiserror::Error;

pub use analysis::Analysis;
pub use analysis::AnalysisSource;
pub use analysis::ScalingPoint;
pub use configuration::TestConfiguration;
pub use configuration::configuration_name;
pub use configuration::generate_configurations;
pub use launcher::ConfigurationLauncher;
pub use launcher::LaunchOutcome;
pub use launcher::LaunchRequest;
pub use launcher::ProcessLauncher;
pub use launcher::ServerRestart;
pub use launcher::UnsupportedRestart;
pub use launcher::WorkloadArgs;
pub use runner::ConfigurationOutcome;
pub use runner::MatrixRunner;
pub use runner::MatrixSettings;
pub use runner::MatrixSummary;
pub use runner::SUMMARY_FILE_NAME;
pub use runner::record_from_report;
pub use summary::render_summary;
pub use summary::write_summary;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Matrix execution and analysis errors.
#[derive(Debug, Error)]
pub enum MatrixError {
    /// Filesystem failure.
    #[error("matrix io error: {0}")]
    Io(String),
    /// Result store failure.
    #[error(transparent)]
    Store(#[from] ResultStoreError),
    /// A report file could not be read.
    #[error("matrix report error: {0}")]
    Report(String),
    /// A cell invocation could not be started.
    #[error("matrix launch error: {0}")]
    Launch(String),
    /// The store restart hook is declared but not implemented.
    #[error("store restart is not implemented")]
    RestartNotImplemented,
    /// No results were found to analyze.
    #[error("no matrix results found in {0}")]
    NoResults(String),
}
