// crates/loadgen-core/tests/run_workload.rs
// ============================================================================
// Module: Run Workload Tests
// Description: End-to-end runs against the in-memory store.
// ============================================================================
//! ## Overview
//! Runs short workloads and checks reports, WAL output, and cleanup.

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

use std::sync::Arc;
use std::time::Duration;

use loadgen_core::CrudMix;
use loadgen_core::DatabaseConfig;
use loadgen_core::InMemoryStore;
use loadgen_core::MixSpec;
use loadgen_core::RunError;
use loadgen_core::RunReport;
use loadgen_core::RunSettings;
use loadgen_core::WorkloadPhase;
use loadgen_core::WorkloadProfile;
use loadgen_core::run_workload;

fn settings(wal_dir: &std::path::Path) -> RunSettings {
    let mut settings = RunSettings::new(
        vec![DatabaseConfig::new("alpha", 2, 1), DatabaseConfig::new("beta", 1, 2)],
        wal_dir,
        Duration::from_millis(200),
    );
    settings.sample_interval = Duration::from_millis(20);
    settings.payload.doc_size = 64;
    settings.payload.pool_size = 8;
    settings.workers.doc_count = 100;
    settings
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_reports_every_database_and_cleans_up() {
    let wal = tempfile::tempdir().unwrap();
    let store = InMemoryStore::with_wal_dir(wal.path());
    let report = run_workload(settings(wal.path()), Arc::new(store.clone())).await.unwrap();

    assert_eq!(report.metrics.databases.len(), 2);
    assert!(report.total_operations() > 0);
    assert!(report.throughput() > 0.0);
    assert_eq!(report.workers_per_db, 2);
    assert_eq!(report.connections_per_db, 2);
    let alpha = &report.metrics.databases[0];
    assert_eq!(alpha.name, "alpha");
    assert!(alpha.wal.samples >= 2);
    assert!(alpha.wal.final_bytes > 0);
    assert!(report.metrics.global.wal_growth_bytes > 0);

    assert!(!store.is_open("alpha"));
    assert!(!store.is_open("beta"));
    assert_eq!(store.opened_connections(), store.closed_connections());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn profile_phases_are_counted_by_name() {
    let wal = tempfile::tempdir().unwrap();
    let mut settings = settings(wal.path());
    settings.duration = Duration::from_millis(300);
    settings.profile = Some(
        WorkloadProfile::new(vec![
            WorkloadPhase {
                name: "warmup".to_string(),
                start: Duration::ZERO,
                duration: Duration::from_millis(100),
                workers: 1,
                mix: MixSpec::Fixed(CrudMix::new(100, 0, 0, 0).unwrap()),
                target_ops_per_sec: None,
            },
            WorkloadPhase {
                name: "steady".to_string(),
                start: Duration::from_millis(100),
                duration: Duration::from_secs(60),
                workers: 3,
                mix: MixSpec::Fixed(CrudMix::DEFAULT),
                target_ops_per_sec: None,
            },
        ])
        .unwrap(),
    );
    let report = run_workload(settings, Arc::new(InMemoryStore::new())).await.unwrap();
    let phases = &report.metrics.phases;
    assert!(phases.get("warmup").copied().unwrap_or(0) > 0);
    assert!(phases.get("steady").copied().unwrap_or(0) > 0);
    let phase_total: u64 = phases.values().sum();
    assert_eq!(phase_total, report.total_operations());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn measured_duration_covers_operations_finished_while_draining() {
    let wal = tempfile::tempdir().unwrap();
    let mut settings =
        RunSettings::new(vec![DatabaseConfig::new("slow", 1, 1)], wal.path(), Duration::from_millis(40));
    settings.sample_interval = Duration::from_millis(10);
    let store = InMemoryStore::new().with_delay(Duration::from_millis(150));
    let report = run_workload(settings, Arc::new(store)).await.unwrap();

    assert!(report.total_operations() >= 1);
    assert!(report.metrics.duration >= Duration::from_millis(150));
    let ceiling = f64::from(u32::try_from(report.total_operations()).unwrap()) / 0.15;
    assert!(report.throughput() <= ceiling, "{} > {ceiling}", report.throughput());
}

#[tokio::test]
async fn invalid_settings_fail_before_opening_anything() {
    let wal = tempfile::tempdir().unwrap();
    let mut settings = settings(wal.path());
    settings.databases.push(DatabaseConfig::new("alpha", 1, 1));
    let store = InMemoryStore::new();
    let err = run_workload(settings, Arc::new(store.clone())).await.unwrap_err();
    match err {
        RunError::Invalid(err) => assert_eq!(err.field, "databases[2].name"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.opened_connections(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn report_survives_a_json_round_trip() {
    let wal = tempfile::tempdir().unwrap();
    let report = run_workload(settings(wal.path()), Arc::new(InMemoryStore::new())).await.unwrap();
    let path = wal.path().join("results").join("run.json");
    report.write_json(&path).unwrap();
    let loaded = RunReport::read_json(&path).unwrap();
    assert_eq!(loaded.total_operations(), report.total_operations());
    assert_eq!(loaded.databases, report.databases);
    assert!((loaded.p95_ms() - report.p95_ms()).abs() < 1e-3);
}
