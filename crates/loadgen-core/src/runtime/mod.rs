// crates/loadgen-core/src/runtime/mod.rs
// ============================================================================
// Module: Loadgen Runtime
// Description: Database lifecycle, worker pool, aggregation, and run driver.
// Purpose: Execute workloads against a store under test and measure them.
// Dependencies: crate::{core, interfaces}, rand, tokio, tracing
// ============================================================================

//! ## Overview
//! Runtime modules wire core types to a live store: the database manager
//! owns per-database state, the worker pool issues traffic, metrics
//! aggregate it, and the run driver sequences a whole run.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod database;
pub mod memory;
pub mod metrics;
pub mod pool;
pub mod run;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use database::DatabaseConfig;
pub use database::DatabaseContext;
pub use database::DatabaseError;
pub use database::DatabaseManager;
pub use database::ManagerSettings;
pub use database::PayloadSettings;
pub use database::validate_databases;
pub use memory::InMemoryStore;
pub use metrics::DatabaseReport;
pub use metrics::GlobalReport;
pub use metrics::MultiDbReport;
pub use metrics::PercentileAggregation;
pub use metrics::PhaseCounter;
pub use metrics::collect;
pub use metrics::combine_latency;
pub use metrics::throughput;
pub use pool::PoolError;
pub use pool::PoolStatus;
pub use pool::ScaleOutcome;
pub use pool::WorkerAssignment;
pub use pool::WorkerPool;
pub use pool::WorkerSettings;
pub use pool::WorkerSnapshot;
pub use run::RunContext;
pub use run::RunError;
pub use run::RunReport;
pub use run::RunSettings;
pub use run::run_workload;
