// crates/loadgen-core/src/lib.rs
// ============================================================================
// Module: Loadgen Core Library
// Description: Public API surface for the multi-database workload engine.
// Purpose: Expose workload types, store interfaces, and the run driver.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Loadgen core drives synthetic CRUD traffic against one or more databases
//! of a store under test. It follows a phased, time-interpolated workload
//! while measuring latency distributions, WAL growth, and healing overhead.
//! The store is reached only through the [`StoreConnection`] interface.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::DatabaseHandle;
pub use interfaces::StoreConnection;
pub use interfaces::StoreConnector;
pub use interfaces::StoreError;
pub use runtime::DatabaseConfig;
pub use runtime::DatabaseContext;
pub use runtime::DatabaseError;
pub use runtime::DatabaseManager;
pub use runtime::DatabaseReport;
pub use runtime::GlobalReport;
pub use runtime::InMemoryStore;
pub use runtime::ManagerSettings;
pub use runtime::MultiDbReport;
pub use runtime::PayloadSettings;
pub use runtime::PercentileAggregation;
pub use runtime::PhaseCounter;
pub use runtime::PoolError;
pub use runtime::PoolStatus;
pub use runtime::RunContext;
pub use runtime::RunError;
pub use runtime::RunReport;
pub use runtime::RunSettings;
pub use runtime::ScaleOutcome;
pub use runtime::WorkerAssignment;
pub use runtime::WorkerPool;
pub use runtime::WorkerSettings;
pub use runtime::WorkerSnapshot;
pub use runtime::run_workload;
pub use runtime::validate_databases;
