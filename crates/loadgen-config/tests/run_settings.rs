// crates/loadgen-config/tests/run_settings.rs
// ============================================================================
// Module: Run Settings Conversion Tests
// Description: File configuration mapped onto core run settings.
// ============================================================================
//! ## Overview
//! Parses complete TOML documents and checks the resulting run settings,
//! workload profile, and command-line overrides.

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

use std::path::PathBuf;
use std::time::Duration;

use loadgen_config::ConfigError;
use loadgen_config::LoadgenConfig;
use loadgen_config::RunOverrides;
use loadgen_core::CrudMix;
use loadgen_core::PercentileAggregation;
use loadgen_core::SamplingMode;
use loadgen_core::WorkerAssignment;

const FULL: &str = r#"
[run]
duration_secs = 30
seed = 7
collection = "bench"
doc_size = 256
doc_count = 500
payload_pool_size = 10
wal_dir = "/tmp/wal"
sample_interval_ms = 250
per_database_mix = true
worker_assignment = "shared"
sampling = "reservoir"
reservoir_capacity = 2048
aggregation = "merged_histogram"
operation_timeout_ms = 100
output = "out/report.json"

[store]
address = "10.0.0.5:9000"
request_timeout_ms = 0

[crud]
create = 25
read = 50
update = 15
delete = 10

[[databases]]
name = "orders"
workers = 4
connections = 2

[[databases]]
name = "users"
workers = 2
connections = 1
crud = { create = 10, read = 80, update = 5, delete = 5 }

[[profile.phases]]
name = "warmup"
start_secs = 0
duration_secs = 10
workers = 2

[[profile.phases]]
name = "shift"
start_secs = 10
duration_secs = 300
workers = 6
target_ops_per_sec = 500.0
transition = { from = { create = 80, read = 10, update = 5, delete = 5 }, to = { create = 10, read = 80, update = 5, delete = 5 }, delay_secs = 0, duration_secs = 300 }
"#;

#[test]
fn full_document_maps_onto_run_settings() {
    let config = LoadgenConfig::parse(FULL).unwrap();
    let settings = config.run_settings().unwrap();

    assert_eq!(settings.duration, Duration::from_secs(30));
    assert_eq!(settings.sample_interval, Duration::from_millis(250));
    assert_eq!(settings.wal_dir, PathBuf::from("/tmp/wal"));
    assert_eq!(settings.payload.doc_size, 256);
    assert_eq!(settings.payload.pool_size, 10);
    assert_eq!(settings.payload.seed, 7);
    assert_eq!(settings.sampling, SamplingMode::Reservoir {
        capacity: 2048,
        seed: 7
    });
    assert_eq!(settings.aggregation, PercentileAggregation::MergedHistogram);
    assert_eq!(settings.workers.assignment, WorkerAssignment::Shared);
    assert!(settings.workers.per_database_mix);
    assert_eq!(settings.workers.collection, "bench");
    assert_eq!(settings.workers.doc_count, 500);
    assert_eq!(settings.workers.operation_timeout, Some(Duration::from_millis(100)));
    assert_eq!(settings.workers.base_mix, Some(CrudMix::new(25, 50, 15, 10).unwrap()));

    assert_eq!(settings.databases.len(), 2);
    assert_eq!(settings.databases[1].crud, Some(CrudMix::new(10, 80, 5, 5).unwrap()));

    assert_eq!(config.store.request_timeout(), None);
    assert_eq!(config.store.connect_timeout(), Duration::from_secs(5));
}

#[test]
fn phases_fall_back_to_the_default_mix() {
    let config = LoadgenConfig::parse(FULL).unwrap();
    let profile = config.workload_profile().unwrap().unwrap();
    assert_eq!(profile.phases().len(), 2);
    assert_eq!(profile.current_mix(Duration::from_secs(5)), Some(CrudMix::new(25, 50, 15, 10).unwrap()));
    assert_eq!(profile.current_worker_count(Duration::from_secs(5)), Some(2));
}

#[test]
fn transition_delay_is_measured_from_phase_start() {
    let config = LoadgenConfig::parse(FULL).unwrap();
    let profile = config.workload_profile().unwrap().unwrap();
    let midpoint = Duration::from_secs(10 + 150);
    assert_eq!(profile.current_mix(midpoint), Some(CrudMix::new(45, 45, 5, 5).unwrap()));
    assert_eq!(profile.current_operation_rate(midpoint), Some(500.0));
}

#[test]
fn overlapping_phases_are_reported_under_profile() {
    let content = r#"
[[profile.phases]]
name = "a"
start_secs = 0
duration_secs = 20
workers = 1

[[profile.phases]]
name = "b"
start_secs = 10
duration_secs = 20
workers = 1
"#;
    match LoadgenConfig::parse(content) {
        Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "profile.phases[1].start"),
        other => panic!("expected overlap error, got {other:?}"),
    }
}

#[test]
fn phase_rejects_crud_and_transition_together() {
    let content = r#"
[[profile.phases]]
name = "a"
duration_secs = 20
workers = 1
crud = { create = 25, read = 25, update = 25, delete = 25 }
transition = { from = { create = 25, read = 25, update = 25, delete = 25 }, to = { create = 25, read = 25, update = 25, delete = 25 }, duration_secs = 5 }
"#;
    match LoadgenConfig::parse(content) {
        Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "profile.phases[0]"),
        other => panic!("expected conflict error, got {other:?}"),
    }
}

#[test]
fn invalid_transition_endpoint_names_the_phase() {
    let content = r#"
[[profile.phases]]
name = "a"
duration_secs = 20
workers = 1
transition = { from = { create = 50, read = 50, update = 50, delete = 0 }, to = { create = 25, read = 25, update = 25, delete = 25 }, duration_secs = 5 }
"#;
    match LoadgenConfig::parse(content) {
        Err(ConfigError::Invalid { field, .. }) => {
            assert!(field.starts_with("profile.phases[0].transition"), "field was {field}");
        }
        other => panic!("expected transition error, got {other:?}"),
    }
}

#[test]
fn overrides_replace_the_database_list() {
    let mut config = LoadgenConfig::parse(FULL).unwrap();
    let overrides = RunOverrides {
        databases: Some(vec!["db1".to_string(), "db2".to_string(), "db3".to_string()]),
        workers: Some(3),
        connections: Some(5),
        duration_secs: Some(12),
        crud: Some(CrudMix::new(40, 40, 10, 10).unwrap()),
        doc_size: Some(64),
        doc_count: Some(99),
        output: Some(PathBuf::from("cell.json")),
        ..RunOverrides::default()
    };
    overrides.apply(&mut config).unwrap();

    let names: Vec<&str> = config.databases.iter().map(|db| db.name.as_str()).collect();
    assert_eq!(names, vec!["db1", "db2", "db3"]);
    assert!(config.databases.iter().all(|db| db.workers == 3 && db.connections == 5));
    assert_eq!(config.run.duration_secs, 12);
    assert_eq!(config.run.doc_size, 64);
    assert_eq!(config.run.doc_count, 99);
    assert_eq!(config.run.output, Some(PathBuf::from("cell.json")));
    assert_eq!(config.crud, Some(CrudMix::new(40, 40, 10, 10).unwrap()));
}

#[test]
fn overrides_scale_existing_databases() {
    let mut config = LoadgenConfig::parse(FULL).unwrap();
    RunOverrides {
        workers: Some(8),
        ..RunOverrides::default()
    }
    .apply(&mut config)
    .unwrap();
    assert!(config.databases.iter().all(|db| db.workers == 8));
    assert_eq!(config.databases[0].connections, 2);
    assert!(RunOverrides::default().is_empty());
}

#[test]
fn overrides_are_revalidated() {
    let mut config = LoadgenConfig::parse(FULL).unwrap();
    let err = RunOverrides {
        duration_secs: Some(0),
        ..RunOverrides::default()
    }
    .apply(&mut config)
    .unwrap_err();
    assert!(err.to_string().contains("run.duration_secs"));
}
