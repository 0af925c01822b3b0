// crates/loadgen-core/src/core/mod.rs
// ============================================================================
// Module: Loadgen Core Types
// Description: Workload description and measurement primitives.
// Purpose: Provide the value types and trackers shared by every run component.
// Dependencies: rand, serde, thiserror
// ============================================================================

//! ## Overview
//! Core types describe what a run issues (operation types, CRUD mixes,
//! transitions, phased profiles) and what it measures (latency, WAL size,
//! healing counters). They carry no runtime wiring; the runtime module
//! composes them.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod healing;
pub mod latency;
pub mod operation;
pub mod profile;
pub mod time;
pub mod transition;
pub mod wal;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use healing::HealingEvent;
pub use healing::HealingStats;
pub use healing::HealingSummary;
pub use healing::HealingTracker;
pub use latency::ExactAccumulator;
pub use latency::HistogramAccumulator;
pub use latency::LatencyAccumulator;
pub use latency::LatencyHistogram;
pub use latency::LatencyMetrics;
pub use latency::LatencySnapshot;
pub use latency::LatencyStats;
pub use latency::OperationLatency;
pub use latency::ReservoirAccumulator;
pub use latency::SamplingMode;
pub use latency::percentile;
pub use operation::CrudMix;
pub use operation::MIX_TOTAL;
pub use operation::OperationType;
pub use operation::ValidationError;
pub use profile::MixSpec;
pub use profile::WorkloadPhase;
pub use profile::WorkloadProfile;
pub use time::RunClock;
pub use transition::CrudTransition;
pub use wal::WalError;
pub use wal::WalSample;
pub use wal::WalSummary;
pub use wal::WalTracker;
