// crates/loadgen-core/tests/database_manager.rs
// ============================================================================
// Module: Database Manager Tests
// Description: Registration, teardown, and in-memory store setup.
// ============================================================================
//! ## Overview
//! Opens databases through the manager against the in-memory store and checks
//! duplicate rejection and close-all behavior when a close fails.

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

use loadgen_core::DatabaseConfig;
use loadgen_core::DatabaseError;
use loadgen_core::DatabaseManager;
use loadgen_core::HealingStats;
use loadgen_core::InMemoryStore;
use loadgen_core::ManagerSettings;
use loadgen_core::OperationType;
use loadgen_core::PayloadSettings;
use loadgen_core::SamplingMode;
use loadgen_core::StoreConnector;
use loadgen_core::StoreError;

fn manager(store: &InMemoryStore) -> DatabaseManager {
    DatabaseManager::new(Arc::new(store.clone()), ManagerSettings {
        wal_root: Path::new("/nonexistent-wal-root").to_path_buf(),
        sampling: SamplingMode::Exact,
        payload: PayloadSettings {
            doc_size: 8,
            pool_size: 2,
            seed: 1,
        },
    })
}

// ============================================================================
// SECTION: Registration
// ============================================================================

#[tokio::test]
async fn adding_a_registered_name_is_a_duplicate() {
    let store = InMemoryStore::new();
    let manager = manager(&store);
    manager.add_database(DatabaseConfig::new("orders", 1, 2)).await.unwrap();
    let opened = store.opened_connections();

    let err = manager.add_database(DatabaseConfig::new("orders", 4, 1)).await.unwrap_err();
    assert!(matches!(err, DatabaseError::Duplicate(ref name) if name == "orders"));
    assert_eq!(manager.len(), 1);
    assert_eq!(manager.get("orders").unwrap().config().workers, 1);
    assert_eq!(store.opened_connections(), opened);
}

// ============================================================================
// SECTION: Teardown
// ============================================================================

#[tokio::test]
async fn close_all_keeps_going_after_a_failed_close() {
    let store = InMemoryStore::new();
    store.fail_close_database("a");
    let manager = manager(&store);
    for name in ["a", "b", "c"] {
        manager.add_database(DatabaseConfig::new(name, 1, 1)).await.unwrap();
    }

    let err = manager.close_all().await.unwrap_err();
    match err {
        DatabaseError::Store {
            database,
            source,
        } => {
            assert_eq!(database, "a");
            assert!(matches!(source, StoreError::Rejected(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(manager.is_empty());
    assert!(store.is_open("a"));
    assert!(!store.is_open("b"));
    assert!(!store.is_open("c"));
    assert_eq!(store.closed_connections(), store.opened_connections());
}

#[tokio::test]
async fn close_all_on_an_empty_manager_succeeds() {
    let store = InMemoryStore::new();
    let manager = manager(&store);
    manager.close_all().await.unwrap();
    assert!(manager.is_empty());
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

#[tokio::test]
async fn delay_keeps_earlier_store_setup() {
    let store = InMemoryStore::new();
    store.fail_operation(OperationType::Read);
    let scripted = HealingStats {
        total_scans: 4,
        documents_healed: 2,
        ..HealingStats::default()
    };
    store.script_healing("orders", vec![scripted]);
    let store = store.with_delay(Duration::from_millis(1));

    let connection = store.connect().await.unwrap();
    let handle = connection.open_database("orders").await.unwrap();
    let err = connection.read(&handle, "loadgen", "doc-1").await.unwrap_err();
    assert!(matches!(err, StoreError::Rejected(_)));
    assert_eq!(connection.healing_stats(&handle).await.unwrap(), scripted);
}
