// crates/loadgen-core/src/runtime/metrics.rs
// ============================================================================
// Module: Multi-DB Metrics
// Description: Per-database and global aggregation of run measurements.
// Purpose: Turn per-database trackers into one comparable run report.
// Dependencies: crate::{core, runtime::database}, serde
// ============================================================================

//! ## Overview
//! [`collect`] reads every database's latency snapshot, WAL summary, and
//! healing summary, then builds global figures:
//! - Percentiles: count-weighted average of each database's percentiles by
//!   default ([`PercentileAggregation::WeightedAverage`]). This is an
//!   approximation. Its error grows with per-database count skew combined
//!   with differences between per-database distributions. With histogram
//!   accumulators, [`PercentileAggregation::MergedHistogram`] instead merges
//!   buckets and reads percentiles off the merged distribution.
//! - Min and max: exact across databases.
//! - WAL growth: sum of per-database `final - initial`.
//! - Healing: summed counts and time, overhead recomputed against run duration.
//!
//! Per-phase operation counts come from a separate [`PhaseCounter`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::core::HealingSummary;
use crate::core::LatencyHistogram;
use crate::core::LatencySnapshot;
use crate::core::LatencyStats;
use crate::core::OperationLatency;
use crate::core::OperationType;
use crate::core::WalSummary;
use crate::core::healing::overhead_percent;
use crate::core::time::duration_ms;
use crate::runtime::database::DatabaseContext;
use crate::runtime::database::DatabaseManager;

// ============================================================================
// SECTION: Phase Counter
// ============================================================================

/// Operation counts keyed by phase name.
#[derive(Debug, Default)]
pub struct PhaseCounter {
    /// Counters; the write lock is taken only to add a new phase.
    counts: RwLock<BTreeMap<String, AtomicU64>>,
}

impl PhaseCounter {
    /// Creates an empty counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one operation to `phase`.
    pub fn increment(&self, phase: &str) {
        {
            let counts = self.counts.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(counter) = counts.get(phase) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut counts = self.counts.write().unwrap_or_else(PoisonError::into_inner);
        counts.entry(phase.to_string()).or_default().fetch_add(1, Ordering::Relaxed);
    }

    /// Operations counted for `phase`.
    #[must_use]
    pub fn get(&self, phase: &str) -> u64 {
        self.counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(phase)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    /// Copy of every phase count.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(phase, counter)| (phase.clone(), counter.load(Ordering::Relaxed)))
            .collect()
    }
}

// ============================================================================
// SECTION: Reports
// ============================================================================

/// Strategy for combining per-database percentiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentileAggregation {
    /// Count-weighted average of per-database percentiles.
    #[default]
    WeightedAverage,
    /// Percentiles over merged per-database histograms.
    MergedHistogram,
}

/// Measurements for one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseReport {
    /// Database name.
    pub name: String,
    /// Operations issued, failures included.
    pub total_operations: u64,
    /// Failed operations.
    pub total_errors: u64,
    /// Operations per second over the run.
    pub throughput: f64,
    /// Per-operation latency and errors.
    pub latency: LatencySnapshot,
    /// WAL growth.
    pub wal: WalSummary,
    /// Healing activity.
    pub healing: HealingSummary,
}

/// Measurements across every database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalReport {
    /// Operations issued across databases.
    pub total_operations: u64,
    /// Failed operations across databases.
    pub total_errors: u64,
    /// Operations per second over the run.
    pub throughput: f64,
    /// How percentiles were combined.
    pub aggregation: PercentileAggregation,
    /// Combined per-operation statistics.
    pub operations: BTreeMap<OperationType, OperationLatency>,
    /// Combined statistics over every operation type.
    pub overall: LatencyStats,
    /// Sum of per-database WAL growth.
    pub wal_growth_bytes: i64,
    /// Summed healing activity.
    pub healing: HealingSummary,
}

/// Full aggregated report for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiDbReport {
    /// Measured run duration.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Per-database reports in name order.
    pub databases: Vec<DatabaseReport>,
    /// Global aggregate.
    pub global: GlobalReport,
    /// Operations per phase name.
    pub phases: BTreeMap<String, u64>,
}

// ============================================================================
// SECTION: Aggregation
// ============================================================================

/// Operations per second over `duration`; zero for an empty duration.
#[must_use]
pub fn throughput(operations: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss, reason = "Operation counts stay far below 2^52.")]
    let operations = operations as f64;
    operations / seconds
}

/// Combines statistics by count-weighted averaging of mean and percentiles.
///
/// Count and total are summed; min and max are exact.
#[must_use]
pub fn combine_latency(parts: &[LatencyStats]) -> LatencyStats {
    let populated: Vec<&LatencyStats> = parts.iter().filter(|stats| stats.count > 0).collect();
    let count = populated.iter().map(|stats| stats.count).fold(0, u64::saturating_add);
    if count == 0 {
        return LatencyStats::default();
    }
    let weighted = |pick: fn(&LatencyStats) -> Duration| -> Duration {
        let sum: u128 = populated
            .iter()
            .map(|stats| pick(stats).as_nanos().saturating_mul(u128::from(stats.count)))
            .fold(0, u128::saturating_add);
        let nanos = sum / u128::from(count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    };
    LatencyStats {
        count,
        total: populated.iter().map(|stats| stats.total).fold(Duration::ZERO, Duration::saturating_add),
        mean: weighted(|stats| stats.mean),
        min: populated.iter().map(|stats| stats.min).min().unwrap_or_default(),
        max: populated.iter().map(|stats| stats.max).max().unwrap_or_default(),
        p50: weighted(|stats| stats.p50),
        p95: weighted(|stats| stats.p95),
        p99: weighted(|stats| stats.p99),
        p999: weighted(|stats| stats.p999),
    }
}

/// Combines statistics by reading percentiles off a merged histogram.
fn combine_merged(parts: &[LatencyStats], histograms: &[LatencyHistogram]) -> LatencyStats {
    let exact = combine_latency(parts);
    let mut merged = LatencyHistogram::default();
    for histogram in histograms {
        merged.merge(histogram);
    }
    if merged.count() == 0 {
        return exact;
    }
    merged.stats(exact.total, exact.min, exact.max)
}

/// Builds the combined statistics for a group of per-database parts.
fn combine(
    aggregation: PercentileAggregation,
    parts: &[LatencyStats],
    histograms: Option<Vec<LatencyHistogram>>,
) -> LatencyStats {
    match (aggregation, histograms) {
        (PercentileAggregation::MergedHistogram, Some(histograms)) => combine_merged(parts, &histograms),
        _ => combine_latency(parts),
    }
}

/// Histograms for `operations` across every context, or `None` if any is missing.
fn histograms_for(
    contexts: &[Arc<DatabaseContext>],
    operations: &[OperationType],
) -> Option<Vec<LatencyHistogram>> {
    let mut histograms = Vec::new();
    for context in contexts {
        for operation in operations {
            histograms.push(context.latency().histogram(*operation)?);
        }
    }
    Some(histograms)
}

/// Builds the report for one database.
fn database_report(context: &DatabaseContext, duration: Duration) -> DatabaseReport {
    let latency = context.latency().snapshot();
    let total_operations = latency.total_operations();
    DatabaseReport {
        name: context.name().to_string(),
        total_operations,
        total_errors: latency.total_errors(),
        throughput: throughput(total_operations, duration),
        latency,
        wal: context.wal().summary(),
        healing: context.healing().summary(duration),
    }
}

/// Sums healing summaries and recomputes overhead over `duration`.
fn sum_healing(reports: &[DatabaseReport], duration: Duration) -> HealingSummary {
    let mut total = HealingSummary::default();
    for report in reports {
        let healing = &report.healing;
        total.total_healings = total.total_healings.saturating_add(healing.total_healings);
        total.documents_healed = total.documents_healed.saturating_add(healing.documents_healed);
        total.total_scans = total.total_scans.saturating_add(healing.total_scans);
        total.events = total.events.saturating_add(healing.events);
        total.healing_time = total.healing_time.saturating_add(healing.healing_time);
    }
    total.overhead_percent = overhead_percent(total.healing_time, duration);
    total
}

/// Aggregates every registered database into a run report.
#[must_use]
pub fn collect(
    manager: &DatabaseManager,
    phases: &PhaseCounter,
    duration: Duration,
    aggregation: PercentileAggregation,
) -> MultiDbReport {
    let contexts = manager.contexts();
    let databases: Vec<DatabaseReport> =
        contexts.iter().map(|context| database_report(context, duration)).collect();

    let mut aggregation_used = aggregation;
    if aggregation == PercentileAggregation::MergedHistogram
        && histograms_for(&contexts, &OperationType::ALL).is_none()
    {
        warn!("merged histogram aggregation requested without histogram accumulators");
        aggregation_used = PercentileAggregation::WeightedAverage;
    }

    let mut operations = BTreeMap::new();
    for operation in OperationType::ALL {
        let parts: Vec<LatencyStats> =
            databases.iter().map(|report| report.latency.stats(operation)).collect();
        let errors = databases
            .iter()
            .map(|report| report.latency.operations.get(&operation).map_or(0, |op| op.errors))
            .fold(0, u64::saturating_add);
        let stats = combine(aggregation_used, &parts, histograms_for(&contexts, &[operation]));
        operations.insert(operation, OperationLatency {
            stats,
            errors,
        });
    }

    let all_parts: Vec<LatencyStats> = databases
        .iter()
        .flat_map(|report| OperationType::ALL.map(|operation| report.latency.stats(operation)))
        .collect();
    let overall = combine(aggregation_used, &all_parts, histograms_for(&contexts, &OperationType::ALL));

    let total_operations = databases.iter().map(|report| report.total_operations).fold(0, u64::saturating_add);
    let total_errors = databases.iter().map(|report| report.total_errors).fold(0, u64::saturating_add);
    let wal_growth_bytes = databases.iter().map(|report| report.wal.growth_bytes).fold(0, i64::saturating_add);
    let healing = sum_healing(&databases, duration);

    MultiDbReport {
        duration,
        global: GlobalReport {
            total_operations,
            total_errors,
            throughput: throughput(total_operations, duration),
            aggregation: aggregation_used,
            operations,
            overall,
            wal_growth_bytes,
            healing,
        },
        databases,
        phases: phases.snapshot(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::LatencyStats;
    use super::PhaseCounter;
    use super::combine_latency;
    use super::throughput;

    fn stats(count: u64, p95_ms: u64, min_ms: u64, max_ms: u64) -> LatencyStats {
        LatencyStats {
            count,
            total: Duration::from_millis(p95_ms * count),
            mean: Duration::from_millis(p95_ms),
            min: Duration::from_millis(min_ms),
            max: Duration::from_millis(max_ms),
            p50: Duration::from_millis(p95_ms),
            p95: Duration::from_millis(p95_ms),
            p99: Duration::from_millis(p95_ms),
            p999: Duration::from_millis(p95_ms),
        }
    }

    #[test]
    fn weighted_average_follows_counts() {
        let combined = combine_latency(&[stats(300, 10, 2, 40), stats(100, 50, 1, 90)]);
        assert_eq!(combined.count, 400);
        // (300 * 10 + 100 * 50) / 400
        assert_eq!(combined.p95, Duration::from_millis(20));
        assert_eq!(combined.min, Duration::from_millis(1));
        assert_eq!(combined.max, Duration::from_millis(90));
    }

    #[test]
    fn empty_parts_are_ignored() {
        let combined = combine_latency(&[LatencyStats::default(), stats(10, 5, 5, 5)]);
        assert_eq!(combined.count, 10);
        assert_eq!(combined.min, Duration::from_millis(5));
        assert_eq!(combine_latency(&[]), LatencyStats::default());
    }

    #[test]
    fn phase_counter_tallies_by_name() {
        let counter = PhaseCounter::new();
        counter.increment("warmup");
        counter.increment("warmup");
        counter.increment("steady");
        assert_eq!(counter.get("warmup"), 2);
        assert_eq!(counter.get("missing"), 0);
        assert_eq!(counter.snapshot().len(), 2);
    }

    #[test]
    fn throughput_handles_zero_duration() {
        assert!(throughput(10, Duration::ZERO).abs() < f64::EPSILON);
        assert!((throughput(500, Duration::from_secs(10)) - 50.0).abs() < f64::EPSILON);
    }
}
