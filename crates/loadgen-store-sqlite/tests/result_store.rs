// crates/loadgen-store-sqlite/tests/result_store.rs
// ============================================================================
// Module: SQLite Result Store Tests
// Description: Validate matrix run persistence and latest-run loading.
// Purpose: Ensure result rows survive a write and reload unchanged.
// Dependencies: loadgen-store-sqlite, proptest, rusqlite, tempfile
// ============================================================================

//! ## Overview
//! Writes runs and results through the store, reopens the file, and checks
//! that the latest run reproduces every field.

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
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use loadgen_store_sqlite::ResultRecord;
use loadgen_store_sqlite::ResultStoreConfig;
use loadgen_store_sqlite::ResultStoreError;
use loadgen_store_sqlite::SqliteResultStore;
use proptest::prelude::*;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn sample_result(name: &str, success: bool) -> ResultRecord {
    ResultRecord {
        config_name: name.to_string(),
        databases: 3,
        connections_per_db: 5,
        workers_per_db: 2,
        duration_sec: 30.0,
        total_ops: 123_456,
        throughput: 4_115.2,
        p95_latency_ms: 12.75,
        p99_latency_ms: 40.125,
        success,
        result_file: success.then(|| format!("{name}.json")),
    }
}

fn open_store(dir: &TempDir) -> SqliteResultStore {
    SqliteResultStore::open(ResultStoreConfig::in_output_dir(dir.path())).unwrap()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn latest_run_reproduces_written_rows() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let run_id = store.begin_run(Path::new("out"), 1_000, 2).unwrap();
    let ok = sample_result("3db_5conn_2w", true);
    let failed = sample_result("1db_1conn_1w", false);
    store.record_result(run_id, &ok).unwrap();
    store.record_result(run_id, &failed).unwrap();
    store.finish_run(run_id, 2_000, 1, 1).unwrap();
    drop(store);

    let reopened = open_store(&dir);
    let loaded = reopened.latest_run().unwrap().unwrap();
    assert_eq!(loaded.run.id, run_id);
    assert_eq!(loaded.run.output_dir, "out");
    assert_eq!(loaded.run.started_at, 1_000);
    assert_eq!(loaded.run.finished_at, Some(2_000));
    assert_eq!(loaded.run.total_tests, 2);
    assert_eq!(loaded.run.success_count, 1);
    assert_eq!(loaded.run.fail_count, 1);
    assert_eq!(loaded.results, vec![ok, failed]);
}

#[test]
fn latest_run_is_the_largest_id() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let first = store.begin_run(Path::new("a"), 1, 1).unwrap();
    store.record_result(first, &sample_result("first", true)).unwrap();
    let second = store.begin_run(Path::new("b"), 2, 1).unwrap();
    store.record_result(second, &sample_result("second", true)).unwrap();
    assert!(second > first);

    let latest = store.latest_run().unwrap().unwrap();
    assert_eq!(latest.run.id, second);
    assert_eq!(latest.results.len(), 1);
    assert_eq!(latest.results[0].config_name, "second");

    let older = store.load_run(first).unwrap().unwrap();
    assert_eq!(older.results[0].config_name, "first");
    let runs = store.list_runs().unwrap();
    assert_eq!(runs.iter().map(|run| run.id).collect::<Vec<_>>(), vec![second, first]);
}

#[test]
fn empty_store_has_no_latest_run() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    assert!(store.latest_run().unwrap().is_none());
    assert!(store.load_run(42).unwrap().is_none());
}

#[test]
fn unfinished_run_has_no_finish_time() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.begin_run(Path::new("out"), 5, 3).unwrap();
    let latest = store.latest_run().unwrap().unwrap();
    assert_eq!(latest.run.finished_at, None);
    assert!(latest.results.is_empty());
}

#[test]
fn results_require_an_existing_run() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let err = store.record_result(99, &sample_result("orphan", true)).unwrap_err();
    assert!(matches!(err, ResultStoreError::Invalid(_)));
    let err = store.finish_run(99, 1, 0, 0).unwrap_err();
    assert!(matches!(err, ResultStoreError::Invalid(_)));
}

#[test]
fn open_existing_requires_the_file() {
    let dir = TempDir::new().unwrap();
    let err = SqliteResultStore::open_existing(ResultStoreConfig::in_output_dir(dir.path()))
        .unwrap_err();
    assert!(matches!(err, ResultStoreError::Io(_)));
}

#[test]
fn directory_path_is_rejected() {
    let dir = TempDir::new().unwrap();
    let err = SqliteResultStore::open(ResultStoreConfig::new(dir.path())).unwrap_err();
    assert!(matches!(err, ResultStoreError::Invalid(_)));
}

#[test]
fn unsupported_schema_version_fails_closed() {
    let dir = TempDir::new().unwrap();
    let config = ResultStoreConfig::in_output_dir(dir.path());
    drop(SqliteResultStore::open(config.clone()).unwrap());
    let connection = rusqlite::Connection::open(&config.path).unwrap();
    connection.execute("UPDATE store_meta SET version = 99", []).unwrap();
    drop(connection);
    let err = SqliteResultStore::open(config).unwrap_err();
    assert!(matches!(err, ResultStoreError::VersionMismatch(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn counts_and_latencies_round_trip(
        total_ops in 0u64..=(i64::MAX as u64),
        p95 in 0.0f64..10_000.0,
        workers in 1u32..64,
    ) {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let run_id = store.begin_run(Path::new("out"), 0, 1).unwrap();
        let record = ResultRecord {
            total_ops,
            p95_latency_ms: p95,
            workers_per_db: workers,
            ..sample_result("cell", true)
        };
        store.record_result(run_id, &record).unwrap();
        let loaded = store.latest_run().unwrap().unwrap();
        prop_assert_eq!(&loaded.results[0], &record);
    }
}
