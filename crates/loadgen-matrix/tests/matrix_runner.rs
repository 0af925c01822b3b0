// crates/loadgen-matrix/tests/matrix_runner.rs
// ============================================================================
// Module: Matrix Runner Tests
// Description: Sequential matrix execution against the in-memory store.
// ============================================================================
//! ## Overview
//! Drives the runner with a launcher that performs real short runs on the
//! in-memory store, then checks reports, failure logs, persisted rows, and
//! the summary document.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use loadgen_core::DatabaseConfig;
use loadgen_core::InMemoryStore;
use loadgen_core::RunSettings;
use loadgen_core::run_workload;
use loadgen_matrix::ConfigurationLauncher;
use loadgen_matrix::LaunchOutcome;
use loadgen_matrix::LaunchRequest;
use loadgen_matrix::MatrixError;
use loadgen_matrix::MatrixRunner;
use loadgen_matrix::MatrixSettings;
use loadgen_matrix::SUMMARY_FILE_NAME;
use loadgen_matrix::ServerRestart;
use loadgen_matrix::generate_configurations;
use loadgen_store_sqlite::ResultStoreConfig;
use loadgen_store_sqlite::SqliteResultStore;

#[derive(Default)]
struct InProcessLauncher {
    failing: BTreeSet<String>,
    unlaunchable: BTreeSet<String>,
}

impl InProcessLauncher {
    fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    fn unlaunchable(mut self, name: &str) -> Self {
        self.unlaunchable.insert(name.to_string());
        self
    }
}

impl ConfigurationLauncher for InProcessLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<LaunchOutcome, MatrixError> {
        let configuration = request.configuration;
        if self.unlaunchable.contains(&configuration.name) {
            return Err(MatrixError::Launch("no such program".to_string()));
        }
        if self.failing.contains(&configuration.name) {
            return Ok(LaunchOutcome {
                success: false,
                output: "store refused connection".to_string(),
            });
        }

        let wal = tempfile::tempdir().unwrap();
        let databases = configuration
            .database_names()
            .into_iter()
            .map(|name| {
                DatabaseConfig::new(name, configuration.workers_per_db, configuration.connections_per_db)
            })
            .collect();
        let mut settings = RunSettings::new(databases, wal.path(), Duration::from_millis(150));
        settings.sample_interval = Duration::from_millis(25);
        settings.payload.doc_size = 32;
        settings.payload.pool_size = 4;
        settings.workers.doc_count = 50;
        let store = InMemoryStore::with_wal_dir(wal.path());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .unwrap();
        let report = runtime.block_on(run_workload(settings, Arc::new(store))).unwrap();
        report.write_json(request.result_file).unwrap();
        Ok(LaunchOutcome {
            success: true,
            output: String::new(),
        })
    }
}

struct CountingRestart(Arc<AtomicUsize>);

impl ServerRestart for CountingRestart {
    fn restart(&self) -> Result<(), MatrixError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn every_cell_runs_in_order_and_is_persisted() {
    let out = tempfile::tempdir().unwrap();
    let configurations = generate_configurations(&[1, 2], &[1], &[1, 2]);
    let runner = MatrixRunner::new(
        MatrixSettings::new(out.path(), 1),
        Box::new(InProcessLauncher::default()),
    );
    let summary = runner.run(&configurations).unwrap();

    let names: Vec<&str> = summary.outcomes.iter().map(|o| o.record.config_name.as_str()).collect();
    assert_eq!(names, vec!["1db_1conn_1w", "1db_1conn_2w", "2db_1conn_1w", "2db_1conn_2w"]);
    assert_eq!(summary.success_count(), 4);
    assert_eq!(summary.fail_count(), 0);
    for outcome in &summary.outcomes {
        assert!(outcome.record.total_ops > 0, "{} issued nothing", outcome.record.config_name);
        assert!(outcome.finished_at >= outcome.started_at);
        assert!(out.path().join(format!("{}.json", outcome.record.config_name)).is_file());
    }
    assert_eq!(summary.outcomes[2].record.databases, 2);
    assert_eq!(summary.outcomes[3].record.workers_per_db, 2);

    let store = SqliteResultStore::open_existing(ResultStoreConfig::in_output_dir(out.path())).unwrap();
    let stored = store.latest_run().unwrap().unwrap();
    assert_eq!(Some(stored.run.id), summary.run_id);
    assert_eq!(stored.run.total_tests, 4);
    assert_eq!(stored.run.success_count, 4);
    assert!(stored.run.finished_at.is_some());
    let stored_records: Vec<_> = summary.outcomes.iter().map(|o| o.record.clone()).collect();
    assert_eq!(stored.results, stored_records);
}

#[test]
fn failed_cells_are_recorded_and_the_matrix_continues() {
    let out = tempfile::tempdir().unwrap();
    let configurations = generate_configurations(&[1], &[1, 2, 3], &[1]);
    let launcher = InProcessLauncher::default().failing("1db_2conn_1w").unlaunchable("1db_3conn_1w");
    let runner = MatrixRunner::new(MatrixSettings::new(out.path(), 1), Box::new(launcher));
    let summary = runner.run(&configurations).unwrap();

    assert_eq!(summary.success_count(), 1);
    assert_eq!(summary.fail_count(), 2);
    let failed = &summary.outcomes[1];
    assert!(!failed.record.success);
    assert_eq!(failed.record.total_ops, 0);
    assert_eq!(failed.record.connections_per_db, 2);
    assert_eq!(failed.output.as_deref(), Some("store refused connection"));
    let log = std::fs::read_to_string(out.path().join("1db_2conn_1w.log")).unwrap();
    assert_eq!(log, "store refused connection");

    let unlaunched = &summary.outcomes[2];
    assert!(unlaunched.output.as_deref().unwrap().contains("no such program"));
    assert!(out.path().join("1db_3conn_1w.log").is_file());

    let store = SqliteResultStore::open_existing(ResultStoreConfig::in_output_dir(out.path())).unwrap();
    let stored = store.latest_run().unwrap().unwrap();
    assert_eq!(stored.run.success_count, 1);
    assert_eq!(stored.run.fail_count, 2);
    assert_eq!(stored.results.len(), 3);
}

#[test]
fn restart_hook_runs_between_cells_only() {
    let out = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut settings = MatrixSettings::new(out.path(), 1);
    settings.restart_server = true;
    let runner = MatrixRunner::new(
        settings,
        Box::new(InProcessLauncher::default().failing("1db_1conn_1w").failing("2db_1conn_1w").failing("3db_1conn_1w")),
    )
    .with_restart(Box::new(CountingRestart(Arc::clone(&calls))));
    runner.run(&generate_configurations(&[1, 2, 3], &[1], &[1])).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn unsupported_restart_does_not_stop_the_matrix() {
    let out = tempfile::tempdir().unwrap();
    let mut settings = MatrixSettings::new(out.path(), 1);
    settings.restart_server = true;
    let runner = MatrixRunner::new(
        settings,
        Box::new(InProcessLauncher::default().failing("1db_1conn_1w").failing("1db_1conn_2w")),
    );
    let summary = runner.run(&generate_configurations(&[1], &[1], &[1, 2])).unwrap();
    assert_eq!(summary.outcomes.len(), 2);
}

#[test]
fn summary_lists_every_cell_and_failures() {
    let out = tempfile::tempdir().unwrap();
    let runner = MatrixRunner::new(
        MatrixSettings::new(out.path(), 1),
        Box::new(InProcessLauncher::default().failing("1db_1conn_2w")),
    );
    runner.run(&generate_configurations(&[1], &[1], &[1, 2])).unwrap();

    let text = std::fs::read_to_string(out.path().join(SUMMARY_FILE_NAME)).unwrap();
    assert!(text.contains("# Matrix Summary"));
    assert!(text.contains("2 (1 succeeded, 1 failed)"));
    assert!(text.contains("| 1db_1conn_1w | 1 | 1 | 1 |"));
    assert!(text.contains("| failed |"));
    assert!(text.contains("- 1db_1conn_2w: see `1db_1conn_2w.log`"));
}

#[test]
fn persistence_and_summary_can_be_disabled() {
    let out = tempfile::tempdir().unwrap();
    let mut settings = MatrixSettings::new(out.path(), 1);
    settings.persist_results = false;
    settings.write_summary = false;
    let runner = MatrixRunner::new(settings, Box::new(InProcessLauncher::default().failing("1db_1conn_1w")));
    let summary = runner.run(&generate_configurations(&[1], &[1], &[1])).unwrap();
    assert_eq!(summary.run_id, None);
    assert!(!out.path().join("results.db").exists());
    assert!(!out.path().join(SUMMARY_FILE_NAME).exists());
}
