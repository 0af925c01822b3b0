// crates/loadgen-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Result Store
// Description: Durable matrix result store backend using SQLite.
// Purpose: Persist matrix runs so analysis can reload the latest one.
// Dependencies: rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed store for matrix runs and their
//! per-configuration results. Analysis tools read the latest run back by
//! identifier. Security posture: storage inputs are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::JournalMode;
pub use store::MatrixRunRecord;
pub use store::RESULTS_DB_NAME;
pub use store::ResultRecord;
pub use store::ResultStoreConfig;
pub use store::ResultStoreError;
pub use store::SqliteResultStore;
pub use store::StoredRun;
