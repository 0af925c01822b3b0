// crates/loadgen-core/src/core/healing.rs
// ============================================================================
// Module: Healing Tracker
// Description: Snapshot and event tracking of the store's healing counters.
// Purpose: Report healing activity and overhead for one database over a run.
// Dependencies: crate::interfaces, serde
// ============================================================================

//! ## Overview
//! Two independent measures are reported side by side:
//! - Snapshot deltas: cumulative counters fetched at [`HealingTracker::start`]
//!   and [`HealingTracker::stop`], subtracted.
//! - Event time: durations recorded through [`HealingTracker::record_event`],
//!   summed and expressed as a percentage of run duration.
//!
//! The two are not reconciled.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::core::time::duration_ms;
use crate::interfaces::DatabaseHandle;
use crate::interfaces::StoreConnection;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Cumulative healing counters exposed by the store under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealingStats {
    /// Corruption scans performed.
    pub total_scans: u64,
    /// Documents repaired.
    pub documents_healed: u64,
    /// Documents found corrupted.
    pub documents_corrupted: u64,
    /// Repairs triggered by reads.
    pub on_demand_healings: u64,
    /// Repairs performed by the background scanner.
    pub background_healings: u64,
    /// Unix milliseconds of the last scan, if any.
    pub last_scan_time: Option<i64>,
    /// Unix milliseconds of the last repair, if any.
    pub last_healing_time: Option<i64>,
}

impl HealingStats {
    /// On-demand plus background healings.
    #[must_use]
    pub const fn total_healings(&self) -> u64 {
        self.on_demand_healings.saturating_add(self.background_healings)
    }
}

/// One observed healing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealingEvent {
    /// Time the store spent healing.
    pub duration: Duration,
    /// Documents repaired by the event.
    pub documents: u64,
}

/// Healing activity for one database over a run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HealingSummary {
    /// Healings between the start and stop snapshots.
    pub total_healings: u64,
    /// Documents healed between the snapshots.
    pub documents_healed: u64,
    /// Scans between the snapshots.
    pub total_scans: u64,
    /// Recorded healing events.
    pub events: u64,
    /// Sum of recorded event durations.
    #[serde(with = "duration_ms")]
    pub healing_time: Duration,
    /// `100 * healing_time / run duration`.
    pub overhead_percent: f64,
}

/// Percentage of `total` spent in `busy`; zero for an empty run.
#[must_use]
pub fn overhead_percent(busy: Duration, total: Duration) -> f64 {
    if total.is_zero() {
        return 0.0;
    }
    100.0 * busy.as_secs_f64() / total.as_secs_f64()
}

// ============================================================================
// SECTION: Tracker
// ============================================================================

/// Mutable tracker state.
#[derive(Debug, Default)]
struct HealingState {
    /// Snapshot taken at start.
    initial: Option<HealingStats>,
    /// Snapshot taken at stop.
    last: Option<HealingStats>,
    /// Recorded events.
    events: u64,
    /// Sum of event durations.
    healing_time: Duration,
    /// Documents across recorded events.
    event_documents: u64,
}

/// Healing tracker for one database.
#[derive(Debug, Default)]
pub struct HealingTracker {
    /// Snapshots and event totals.
    state: Mutex<HealingState>,
}

impl HealingTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches and stores the initial snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the counters cannot be fetched.
    pub async fn start(
        &self,
        connection: &dyn StoreConnection,
        handle: &DatabaseHandle,
    ) -> Result<HealingStats, StoreError> {
        let stats = connection.healing_stats(handle).await?;
        self.record_initial(stats);
        Ok(stats)
    }

    /// Fetches and stores the final snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the counters cannot be fetched.
    pub async fn stop(
        &self,
        connection: &dyn StoreConnection,
        handle: &DatabaseHandle,
    ) -> Result<HealingStats, StoreError> {
        let stats = connection.healing_stats(handle).await?;
        self.record_final(stats);
        Ok(stats)
    }

    /// Stores an initial snapshot obtained elsewhere.
    pub fn record_initial(&self, stats: HealingStats) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).initial = Some(stats);
    }

    /// Stores a final snapshot obtained elsewhere.
    pub fn record_final(&self, stats: HealingStats) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).last = Some(stats);
    }

    /// Adds one healing event.
    pub fn record_event(&self, event: HealingEvent) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.events = state.events.saturating_add(1);
        state.healing_time = state.healing_time.saturating_add(event.duration);
        state.event_documents = state.event_documents.saturating_add(event.documents);
    }

    /// Documents repaired across recorded events.
    #[must_use]
    pub fn event_documents(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).event_documents
    }

    /// Summarizes healing over a run of length `total_duration`.
    ///
    /// Missing snapshots count as zeroed counters.
    #[must_use]
    pub fn summary(&self, total_duration: Duration) -> HealingSummary {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let initial = state.initial.unwrap_or_default();
        let last = state.last.unwrap_or(initial);
        HealingSummary {
            total_healings: last.total_healings().saturating_sub(initial.total_healings()),
            documents_healed: last.documents_healed.saturating_sub(initial.documents_healed),
            total_scans: last.total_scans.saturating_sub(initial.total_scans),
            events: state.events,
            healing_time: state.healing_time,
            overhead_percent: overhead_percent(state.healing_time, total_duration),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
