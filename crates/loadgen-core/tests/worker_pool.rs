// crates/loadgen-core/tests/worker_pool.rs
// ============================================================================
// Module: Worker Pool Tests
// Description: Allocation, lifecycle, rescaling, and mix selection.
// ============================================================================
//! ## Overview
//! Drives the pool against the in-memory store and checks registry state.

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

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use loadgen_core::CrudMix;
use loadgen_core::DatabaseConfig;
use loadgen_core::DatabaseManager;
use loadgen_core::InMemoryStore;
use loadgen_core::ManagerSettings;
use loadgen_core::MixSpec;
use loadgen_core::OperationType;
use loadgen_core::PayloadSettings;
use loadgen_core::PhaseCounter;
use loadgen_core::PoolError;
use loadgen_core::PoolStatus;
use loadgen_core::RunClock;
use loadgen_core::SamplingMode;
use loadgen_core::WorkerAssignment;
use loadgen_core::WorkerPool;
use loadgen_core::WorkerSettings;
use loadgen_core::WorkloadPhase;
use loadgen_core::WorkloadProfile;

// ============================================================================
// SECTION: Helpers
// ============================================================================

async fn manager_with(store: &InMemoryStore, databases: &[DatabaseConfig]) -> Arc<DatabaseManager> {
    let manager = Arc::new(DatabaseManager::new(Arc::new(store.clone()), ManagerSettings {
        wal_root: Path::new("/nonexistent-wal-root").to_path_buf(),
        sampling: SamplingMode::Exact,
        payload: PayloadSettings {
            doc_size: 16,
            pool_size: 4,
            seed: 1,
        },
    }));
    for database in databases {
        manager.add_database(database.clone()).await.unwrap();
    }
    manager
}

fn settings() -> WorkerSettings {
    WorkerSettings {
        doc_count: 50,
        idle_backoff: Duration::from_millis(1),
        ..WorkerSettings::default()
    }
}

fn pool(manager: &Arc<DatabaseManager>, profile: Option<WorkloadProfile>, settings: WorkerSettings) -> WorkerPool {
    WorkerPool::new(
        Arc::clone(manager),
        profile.map(Arc::new),
        Arc::new(PhaseCounter::new()),
        RunClock::start(),
        settings,
    )
}

fn phase(name: &str, start_ms: u64, duration_ms: u64, workers: u32) -> WorkloadPhase {
    WorkloadPhase {
        name: name.to_string(),
        start: Duration::from_millis(start_ms),
        duration: Duration::from_millis(duration_ms),
        workers,
        mix: MixSpec::Fixed(CrudMix::DEFAULT),
        target_ops_per_sec: None,
    }
}

async fn join_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        handle.await.unwrap();
    }
}

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pool_moves_through_its_lifecycle() {
    let store = InMemoryStore::new();
    let manager =
        manager_with(&store, &[DatabaseConfig::new("a", 2, 2), DatabaseConfig::new("b", 3, 1)]).await;
    let pool = pool(&manager, None, settings());
    assert_eq!(pool.status(), PoolStatus::Stopped);

    assert_eq!(pool.allocate().unwrap(), 5);
    assert_eq!(pool.status(), PoolStatus::Allocated);
    assert_eq!(pool.start().unwrap(), 5);
    assert_eq!(pool.status(), PoolStatus::Running);
    assert!(matches!(pool.start(), Err(PoolError::InvalidState { .. })));

    tokio::time::sleep(Duration::from_millis(50)).await;
    join_all(pool.stop()).await;
    assert_eq!(pool.status(), PoolStatus::Stopped);
    assert!(pool.total_operations() > 0);
    let recorded: u64 = manager
        .contexts()
        .iter()
        .map(|context| context.latency().snapshot().total_operations())
        .sum();
    assert_eq!(recorded, pool.total_operations());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_twice_leaves_registry_empty() {
    let store = InMemoryStore::new();
    let manager = manager_with(&store, &[DatabaseConfig::new("a", 2, 1)]).await;
    let pool = pool(&manager, None, settings());
    pool.start().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    join_all(pool.stop()).await;
    assert_eq!(pool.worker_count(), 0);
    assert!(pool.workers().is_empty());

    let second = pool.stop();
    assert!(second.is_empty());
    assert_eq!(pool.worker_count(), 0);
    assert_eq!(pool.status(), PoolStatus::Stopped);
}

#[tokio::test]
async fn start_without_databases_fails() {
    let store = InMemoryStore::new();
    let manager = manager_with(&store, &[]).await;
    let pool = pool(&manager, None, settings());
    assert_eq!(pool.start().unwrap_err(), PoolError::NoDatabases);
    assert_eq!(pool.status(), PoolStatus::Stopped);
}

// ============================================================================
// SECTION: Allocation
// ============================================================================

#[tokio::test]
async fn per_database_workers_share_connections_round_robin() {
    let store = InMemoryStore::new();
    let manager = manager_with(&store, &[DatabaseConfig::new("a", 3, 2)]).await;
    let pool = pool(&manager, None, settings());
    pool.allocate().unwrap();
    let slots: Vec<usize> = pool.workers().iter().map(|worker| worker.connection_slot).collect();
    assert_eq!(slots, vec![0, 1, 2]);
    let context = manager.get("a").unwrap();
    assert_eq!(context.connection_count(), 2);
    assert!(pool.stop().is_empty());
}

#[tokio::test]
async fn profile_workers_are_pinned_modulo_database_count() {
    let store = InMemoryStore::new();
    let manager =
        manager_with(&store, &[DatabaseConfig::new("a", 1, 1), DatabaseConfig::new("b", 1, 1)]).await;
    let profile = WorkloadProfile::new(vec![phase("steady", 0, 60_000, 5)]).unwrap();
    let pool = pool(&manager, Some(profile), settings());
    pool.allocate().unwrap();
    let workers = pool.workers();
    let assigned: Vec<&str> = workers.iter().map(|worker| worker.databases[0].as_str()).collect();
    assert_eq!(assigned, vec!["a", "b", "a", "b", "a"]);
    let slots: Vec<usize> = workers.iter().map(|worker| worker.connection_slot).collect();
    assert_eq!(slots, vec![0, 0, 1, 1, 2]);
}

#[tokio::test]
async fn shared_workers_target_every_database() {
    let store = InMemoryStore::new();
    let manager =
        manager_with(&store, &[DatabaseConfig::new("a", 1, 1), DatabaseConfig::new("b", 1, 1)]).await;
    let profile = WorkloadProfile::new(vec![phase("steady", 0, 60_000, 3)]).unwrap();
    let pool = pool(&manager, Some(profile), WorkerSettings {
        assignment: WorkerAssignment::Shared,
        ..settings()
    });
    pool.allocate().unwrap();
    assert!(pool.workers().iter().all(|worker| worker.databases == vec!["a", "b"]));
}

#[tokio::test]
async fn no_workers_before_first_phase() {
    let store = InMemoryStore::new();
    let manager = manager_with(&store, &[DatabaseConfig::new("a", 4, 1)]).await;
    let profile = WorkloadProfile::new(vec![phase("late", 60_000, 60_000, 3)]).unwrap();
    let pool = pool(&manager, Some(profile), settings());
    assert_eq!(pool.desired_workers(), 0);
    assert_eq!(pool.allocate().unwrap(), 0);
}

// ============================================================================
// SECTION: Rescaling
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rescale_replaces_worker_set_on_phase_change() {
    let store = InMemoryStore::new();
    let manager = manager_with(&store, &[DatabaseConfig::new("a", 1, 2)]).await;
    let profile =
        WorkloadProfile::new(vec![phase("small", 0, 100, 2), phase("large", 100, 60_000, 4)]).unwrap();
    let pool = pool(&manager, Some(profile), settings());
    assert_eq!(pool.start().unwrap(), 2);

    let unchanged = pool.scale_workers().unwrap();
    assert!(!unchanged.changed());

    tokio::time::sleep(Duration::from_millis(150)).await;
    let outcome = pool.scale_workers().unwrap();
    assert_eq!((outcome.previous, outcome.current), (2, 4));
    assert!(outcome.changed());
    let ids: Vec<u64> = pool.workers().iter().map(|worker| worker.id).collect();
    assert_eq!(ids, vec![2, 3, 4, 5]);

    let handles = pool.stop();
    assert_eq!(handles.len(), 6);
    join_all(handles).await;
}

#[tokio::test]
async fn rescale_requires_running_pool() {
    let store = InMemoryStore::new();
    let manager = manager_with(&store, &[DatabaseConfig::new("a", 1, 1)]).await;
    let pool = pool(&manager, None, settings());
    assert!(matches!(
        pool.scale_workers(),
        Err(PoolError::InvalidState {
            actual: PoolStatus::Stopped,
            ..
        })
    ));
}

// ============================================================================
// SECTION: Worker Loop
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_operations_record_latency_and_errors() {
    let store = InMemoryStore::new();
    store.fail_operation(OperationType::Read);
    let manager = manager_with(&store, &[DatabaseConfig::new("a", 2, 1)]).await;
    let pool = pool(&manager, None, WorkerSettings {
        base_mix: Some(CrudMix::new(0, 100, 0, 0).unwrap()),
        ..settings()
    });
    pool.start().unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    join_all(pool.stop()).await;

    let metrics = manager.get("a").unwrap().latency().snapshot();
    let reads = metrics.stats(OperationType::Read).count;
    assert!(reads > 0);
    assert_eq!(metrics.operations[&OperationType::Read].errors, reads);
    assert_eq!(metrics.stats(OperationType::Create).count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn per_database_mix_overrides_profile_mix() {
    let store = InMemoryStore::new();
    let mut writes_only = DatabaseConfig::new("w", 1, 1);
    writes_only.crud = Some(CrudMix::new(100, 0, 0, 0).unwrap());
    let manager = manager_with(&store, &[writes_only, DatabaseConfig::new("r", 1, 1)]).await;
    let mut reads = phase("reads", 0, 60_000, 2);
    reads.mix = MixSpec::Fixed(CrudMix::new(0, 100, 0, 0).unwrap());
    let profile = WorkloadProfile::new(vec![reads]).unwrap();
    let pool = pool(&manager, Some(profile), WorkerSettings {
        per_database_mix: true,
        ..settings()
    });
    pool.start().unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    join_all(pool.stop()).await;

    let w = manager.get("w").unwrap().latency().snapshot();
    let r = manager.get("r").unwrap().latency().snapshot();
    assert_eq!(w.stats(OperationType::Read).count, 0);
    assert!(w.stats(OperationType::Create).count > 0);
    assert_eq!(r.stats(OperationType::Create).count, 0);
    assert!(r.stats(OperationType::Read).count > 0);
    assert!(store.document_count("w") > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn operation_timeout_counts_as_error() {
    let store = InMemoryStore::new().with_delay(Duration::from_millis(50));
    let manager = manager_with(&store, &[DatabaseConfig::new("slow", 1, 1)]).await;
    let pool = pool(&manager, None, WorkerSettings {
        operation_timeout: Some(Duration::from_millis(5)),
        ..settings()
    });
    pool.start().unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    join_all(pool.stop()).await;

    let snapshot = manager.get("slow").unwrap().latency().snapshot();
    assert!(snapshot.total_operations() > 0);
    assert_eq!(snapshot.total_errors(), snapshot.total_operations());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_connection_backs_off_between_attempts() {
    let store = InMemoryStore::new();
    let manager = manager_with(&store, &[DatabaseConfig::new("down", 1, 1)]).await;
    let context = manager.get("down").unwrap();
    for slot in 0 .. context.connection_count() {
        context.connection(slot).close().await.unwrap();
    }
    let pool = pool(&manager, None, WorkerSettings {
        idle_backoff: Duration::from_millis(25),
        ..settings()
    });
    pool.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    join_all(pool.stop()).await;

    let snapshot = context.latency().snapshot();
    assert!(snapshot.total_operations() > 0);
    assert_eq!(snapshot.total_errors(), snapshot.total_operations());
    assert!(snapshot.total_operations() <= 10, "{} attempts", snapshot.total_operations());
}
