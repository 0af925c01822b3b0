// crates/loadgen-core/src/core/latency.rs
// ============================================================================
// Module: Latency Metrics
// Description: Per-operation latency accumulators and percentile statistics.
// Purpose: Record every operation latency and summarize it on demand.
// Dependencies: crate::core::{operation, time}, rand, serde
// ============================================================================

//! ## Overview
//! [`LatencyMetrics`] holds one accumulator per [`OperationType`], each behind
//! its own lock, so recording never contends across operation types or across
//! databases. The accumulator is chosen at construction through
//! [`SamplingMode`]:
//! - [`ExactAccumulator`] keeps every sample and yields exact percentiles.
//!   Memory grows linearly with operation count.
//! - [`ReservoirAccumulator`] keeps a bounded uniform sample (Algorithm R).
//!   Count, sum, min and max stay exact; percentiles are estimates.
//! - [`HistogramAccumulator`] buckets samples log-linearly (16 sub-buckets per
//!   power of two). Buckets merge across databases, so a global percentile can
//!   be computed over the merged distribution.
//!
//! Percentiles use linear interpolation between closest ranks:
//! `idx = p * (n - 1)`, `lo = floor(idx)`, `hi = min(lo + 1, n - 1)`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use serde::Serialize;

use crate::core::operation::OperationType;
use crate::core::operation::ValidationError;
use crate::core::time::duration_ms;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Reported percentile points.
pub const P50: f64 = 0.50;
/// 95th percentile.
pub const P95: f64 = 0.95;
/// 99th percentile.
pub const P99: f64 = 0.99;
/// 99.9th percentile.
pub const P999: f64 = 0.999;

/// Linear sub-buckets per power of two in [`LatencyHistogram`].
const SUB_BUCKET_BITS: u32 = 4;
/// Sub-bucket count derived from [`SUB_BUCKET_BITS`].
const SUB_BUCKETS: u64 = 1 << SUB_BUCKET_BITS;
/// Total histogram buckets covering the full `u64` nanosecond range.
const HISTOGRAM_BUCKETS: usize = 16 + 60 * 16;

// ============================================================================
// SECTION: Percentiles
// ============================================================================

/// Computes percentile `p` (in `[0, 1]`) over an ascending sample slice.
///
/// Returns [`Duration::ZERO`] for an empty slice.
#[must_use]
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let Some(last) = sorted.len().checked_sub(1) else {
        return Duration::ZERO;
    };
    let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
    let idx = p * usize_to_f64(last);
    let lo = f64_to_index(idx.floor()).min(last);
    let hi = lo.saturating_add(1).min(last);
    let fraction = idx - usize_to_f64(lo);
    let (Some(low), Some(high)) = (sorted.get(lo), sorted.get(hi)) else {
        return Duration::ZERO;
    };
    if fraction <= 0.0 || lo == hi {
        return *low;
    }
    let low_ns = duration_to_f64_nanos(*low);
    let high_ns = duration_to_f64_nanos(*high);
    f64_nanos_to_duration((high_ns - low_ns).mul_add(fraction, low_ns))
}

/// Converts a sample count into an `f64` for statistics.
#[allow(clippy::cast_precision_loss, reason = "Sample counts stay far below 2^52.")]
const fn usize_to_f64(value: usize) -> f64 {
    value as f64
}

/// Converts a non-negative, already-floored `f64` into an index.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Callers pass floored values in [0, len)."
)]
const fn f64_to_index(value: f64) -> usize {
    value as usize
}

/// Converts a duration into fractional nanoseconds.
#[allow(clippy::cast_precision_loss, reason = "Latencies stay far below 2^52 ns.")]
const fn duration_to_f64_nanos(duration: Duration) -> f64 {
    duration.as_nanos() as f64
}

/// Converts fractional nanoseconds into a duration, rounding to the nearest nanosecond.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    reason = "Value is rounded and clamped to the u64 range first."
)]
fn f64_nanos_to_duration(nanos: f64) -> Duration {
    if !nanos.is_finite() || nanos <= 0.0 {
        return Duration::ZERO;
    }
    let clamped = nanos.round().min(u64::MAX as f64);
    Duration::from_nanos(clamped as u64)
}

/// Saturating nanosecond count for a duration.
fn duration_nanos_u64(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Statistics
// ============================================================================

/// Summary statistics for one operation type.
///
/// # Invariants
/// - All fields are zero when `count` is zero.
/// - `min <= p50 <= p95 <= p99 <= p999 <= max` for exact accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Number of recorded operations.
    pub count: u64,
    /// Sum of all recorded latencies.
    #[serde(with = "duration_ms")]
    pub total: Duration,
    /// Arithmetic mean latency.
    #[serde(with = "duration_ms")]
    pub mean: Duration,
    /// Smallest recorded latency.
    #[serde(with = "duration_ms")]
    pub min: Duration,
    /// Largest recorded latency.
    #[serde(with = "duration_ms")]
    pub max: Duration,
    /// Median latency.
    #[serde(with = "duration_ms")]
    pub p50: Duration,
    /// 95th percentile latency.
    #[serde(with = "duration_ms")]
    pub p95: Duration,
    /// 99th percentile latency.
    #[serde(with = "duration_ms")]
    pub p99: Duration,
    /// 99.9th percentile latency.
    #[serde(with = "duration_ms")]
    pub p999: Duration,
}

impl LatencyStats {
    /// Builds statistics from running totals and an ascending sample slice.
    #[must_use]
    pub fn from_sorted(count: u64, total: Duration, min: Duration, max: Duration, sorted: &[Duration]) -> Self {
        if count == 0 {
            return Self::default();
        }
        Self {
            count,
            total,
            mean: mean_of(total, count),
            min,
            max,
            p50: percentile(sorted, P50),
            p95: percentile(sorted, P95),
            p99: percentile(sorted, P99),
            p999: percentile(sorted, P999),
        }
    }
}

/// Mean of `count` samples summing to `total`.
fn mean_of(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / u128::from(count);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Running count, sum, min, and max shared by every accumulator.
#[derive(Debug, Clone, Copy, Default)]
struct RunningTotals {
    /// Samples observed.
    count: u64,
    /// Sum of observed samples.
    total: Duration,
    /// Smallest observed sample.
    min: Duration,
    /// Largest observed sample.
    max: Duration,
}

impl RunningTotals {
    /// Folds one sample into the totals.
    fn observe(&mut self, duration: Duration) {
        if self.count == 0 || duration < self.min {
            self.min = duration;
        }
        if duration > self.max {
            self.max = duration;
        }
        self.count = self.count.saturating_add(1);
        self.total = self.total.saturating_add(duration);
    }
}

// ============================================================================
// SECTION: Accumulators
// ============================================================================

/// Thread-safe latency accumulator for a single operation type.
pub trait LatencyAccumulator: Send + Sync {
    /// Records one latency observation.
    fn record(&self, duration: Duration);

    /// Summarizes everything recorded so far.
    fn stats(&self) -> LatencyStats;

    /// Mergeable histogram of recorded samples, when the accumulator keeps one.
    fn histogram(&self) -> Option<LatencyHistogram> {
        None
    }
}

/// Accumulator that retains every sample.
#[derive(Debug, Default)]
pub struct ExactAccumulator {
    /// Samples and running totals, updated together.
    state: Mutex<ExactState>,
}

/// Mutable state of an [`ExactAccumulator`].
#[derive(Debug, Default)]
struct ExactState {
    /// Every recorded sample in arrival order.
    samples: Vec<Duration>,
    /// Running totals.
    totals: RunningTotals,
}

impl ExactAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LatencyAccumulator for ExactAccumulator {
    fn record(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.samples.push(duration);
        state.totals.observe(duration);
    }

    fn stats(&self) -> LatencyStats {
        let (mut samples, totals) = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            (state.samples.clone(), state.totals)
        };
        samples.sort_unstable();
        LatencyStats::from_sorted(totals.count, totals.total, totals.min, totals.max, &samples)
    }
}

/// Accumulator that keeps a bounded uniform reservoir of samples.
#[derive(Debug)]
pub struct ReservoirAccumulator {
    /// Maximum retained samples.
    capacity: usize,
    /// Reservoir, totals, and replacement RNG.
    state: Mutex<ReservoirState>,
}

/// Mutable state of a [`ReservoirAccumulator`].
#[derive(Debug)]
struct ReservoirState {
    /// Retained samples.
    samples: Vec<Duration>,
    /// Running totals over every observed sample.
    totals: RunningTotals,
    /// Replacement RNG.
    rng: StdRng,
}

impl ReservoirAccumulator {
    /// Creates a reservoir holding at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize, seed: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(ReservoirState {
                samples: Vec::with_capacity(capacity.min(4_096)),
                totals: RunningTotals::default(),
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    /// Number of samples currently retained.
    #[must_use]
    pub fn retained(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).samples.len()
    }
}

impl LatencyAccumulator for ReservoirAccumulator {
    fn record(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.totals.observe(duration);
        if state.samples.len() < self.capacity {
            state.samples.push(duration);
            return;
        }
        let seen = state.totals.count;
        let slot = state.rng.gen_range(0 .. seen);
        if let Ok(slot) = usize::try_from(slot)
            && let Some(entry) = state.samples.get_mut(slot)
        {
            *entry = duration;
        }
    }

    fn stats(&self) -> LatencyStats {
        let (mut samples, totals) = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            (state.samples.clone(), state.totals)
        };
        samples.sort_unstable();
        LatencyStats::from_sorted(totals.count, totals.total, totals.min, totals.max, &samples)
    }
}

/// Accumulator that buckets samples into a mergeable histogram.
#[derive(Debug, Default)]
pub struct HistogramAccumulator {
    /// Histogram and exact running totals.
    state: Mutex<HistogramState>,
}

/// Mutable state of a [`HistogramAccumulator`].
#[derive(Debug, Default)]
struct HistogramState {
    /// Bucketed samples.
    histogram: LatencyHistogram,
    /// Running totals.
    totals: RunningTotals,
}

impl HistogramAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LatencyAccumulator for HistogramAccumulator {
    fn record(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.histogram.record(duration);
        state.totals.observe(duration);
    }

    fn stats(&self) -> LatencyStats {
        let (histogram, totals) = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            (state.histogram.clone(), state.totals)
        };
        histogram.stats(totals.total, totals.min, totals.max)
    }

    fn histogram(&self) -> Option<LatencyHistogram> {
        Some(self.state.lock().unwrap_or_else(PoisonError::into_inner).histogram.clone())
    }
}

// ============================================================================
// SECTION: Histogram
// ============================================================================

/// Log-linear latency histogram over nanoseconds.
///
/// # Invariants
/// - `total` equals the sum of `counts`.
/// - Bucket widths never exceed 1/16 of their lower bound, bounding relative error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyHistogram {
    /// Per-bucket sample counts.
    counts: Vec<u64>,
    /// Total samples.
    total: u64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            counts: vec![0; HISTOGRAM_BUCKETS],
            total: 0,
        }
    }
}

impl LatencyHistogram {
    /// Records one sample.
    pub fn record(&mut self, duration: Duration) {
        let index = bucket_index(duration_nanos_u64(duration));
        if let Some(count) = self.counts.get_mut(index) {
            *count = count.saturating_add(1);
            self.total = self.total.saturating_add(1);
        }
    }

    /// Adds every sample of `other` into this histogram.
    pub fn merge(&mut self, other: &Self) {
        for (count, add) in self.counts.iter_mut().zip(&other.counts) {
            *count = count.saturating_add(*add);
        }
        self.total = self.total.saturating_add(other.total);
    }

    /// Total samples recorded.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.total
    }

    /// Estimated percentile `p` using the same rank convention as [`percentile`].
    #[must_use]
    pub fn percentile(&self, p: f64) -> Duration {
        let Some(last) = self.total.checked_sub(1) else {
            return Duration::ZERO;
        };
        let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "Rank is floored and bounded by the sample count."
        )]
        let rank = ((p * last as f64).floor() as u64).min(last);
        let mut seen: u64 = 0;
        for (index, count) in self.counts.iter().enumerate() {
            seen = seen.saturating_add(*count);
            if *count > 0 && seen > rank {
                return Duration::from_nanos(bucket_midpoint(index));
            }
        }
        Duration::ZERO
    }

    /// Summarizes the histogram using exact running totals for mean, min and max.
    #[must_use]
    pub fn stats(&self, total: Duration, min: Duration, max: Duration) -> LatencyStats {
        if self.total == 0 {
            return LatencyStats::default();
        }
        let clamp = |value: Duration| value.clamp(min, max);
        LatencyStats {
            count: self.total,
            total,
            mean: mean_of(total, self.total),
            min,
            max,
            p50: clamp(self.percentile(P50)),
            p95: clamp(self.percentile(P95)),
            p99: clamp(self.percentile(P99)),
            p999: clamp(self.percentile(P999)),
        }
    }
}

/// Bucket index for a nanosecond value.
fn bucket_index(nanos: u64) -> usize {
    if nanos < SUB_BUCKETS {
        return usize::try_from(nanos).unwrap_or(0);
    }
    let magnitude = u64::from(63 - nanos.leading_zeros());
    let shift = magnitude - u64::from(SUB_BUCKET_BITS);
    let sub = (nanos >> shift) - SUB_BUCKETS;
    let index = SUB_BUCKETS + shift * SUB_BUCKETS + sub;
    usize::try_from(index).unwrap_or(HISTOGRAM_BUCKETS - 1).min(HISTOGRAM_BUCKETS - 1)
}

/// Representative (midpoint) nanosecond value of a bucket.
fn bucket_midpoint(index: usize) -> u64 {
    let index = u64::try_from(index).unwrap_or(u64::MAX);
    if index < SUB_BUCKETS {
        return index;
    }
    let shift = (index - SUB_BUCKETS) / SUB_BUCKETS;
    let sub = (index - SUB_BUCKETS) % SUB_BUCKETS;
    let lower = (SUB_BUCKETS + sub).checked_shl(u32::try_from(shift).unwrap_or(u32::MAX));
    let width = 1u64.checked_shl(u32::try_from(shift).unwrap_or(u32::MAX)).unwrap_or(u64::MAX);
    lower.map_or(u64::MAX, |lower| lower.saturating_add(width / 2))
}

// ============================================================================
// SECTION: Sampling Mode
// ============================================================================

/// Accumulator strategy selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SamplingMode {
    /// Retain every sample.
    #[default]
    Exact,
    /// Retain a bounded uniform reservoir.
    Reservoir {
        /// Maximum retained samples per operation type.
        capacity: usize,
        /// Seed for reservoir replacement.
        seed: u64,
    },
    /// Retain a mergeable log-linear histogram.
    Histogram,
}

impl SamplingMode {
    /// Checks mode parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when a reservoir has zero capacity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Self::Reservoir {
            capacity: 0, ..
        } = self
        {
            return Err(ValidationError::new(
                "sampling.reservoir_capacity",
                "reservoir capacity must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Builds an accumulator for operation slot `slot`.
    #[must_use]
    pub fn build(&self, slot: u64) -> Box<dyn LatencyAccumulator> {
        match *self {
            Self::Exact => Box::new(ExactAccumulator::new()),
            Self::Reservoir {
                capacity,
                seed,
            } => Box::new(ReservoirAccumulator::new(capacity, seed.wrapping_add(slot))),
            Self::Histogram => Box::new(HistogramAccumulator::new()),
        }
    }
}

// ============================================================================
// SECTION: Per-Database Metrics
// ============================================================================

/// Latency and error statistics for one operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationLatency {
    /// Latency statistics, failures included.
    pub stats: LatencyStats,
    /// Calls that returned an error.
    pub errors: u64,
}

/// Point-in-time latency summary for every operation type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LatencySnapshot {
    /// Per-operation statistics.
    pub operations: BTreeMap<OperationType, OperationLatency>,
}

impl LatencySnapshot {
    /// Total operations across all types.
    #[must_use]
    pub fn total_operations(&self) -> u64 {
        self.operations.values().map(|op| op.stats.count).fold(0, u64::saturating_add)
    }

    /// Total failed operations across all types.
    #[must_use]
    pub fn total_errors(&self) -> u64 {
        self.operations.values().map(|op| op.errors).fold(0, u64::saturating_add)
    }

    /// Statistics for one operation type.
    #[must_use]
    pub fn stats(&self, operation: OperationType) -> LatencyStats {
        self.operations.get(&operation).map(|op| op.stats).unwrap_or_default()
    }
}

/// Latency accumulators and error counters for one database.
pub struct LatencyMetrics {
    /// One accumulator per operation type, indexed by [`OperationType::index`].
    accumulators: [Box<dyn LatencyAccumulator>; 4],
    /// Error counters indexed by [`OperationType::index`].
    errors: [AtomicU64; 4],
    /// Mode the accumulators were built with.
    mode: SamplingMode,
}

impl LatencyMetrics {
    /// Creates metrics using the requested accumulator strategy.
    #[must_use]
    pub fn new(mode: SamplingMode) -> Self {
        let accumulators = OperationType::ALL.map(|op| {
            mode.build(u64::try_from(op.index()).unwrap_or_default())
        });
        Self {
            accumulators,
            errors: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            mode,
        }
    }

    /// Accumulator strategy in use.
    #[must_use]
    pub const fn mode(&self) -> SamplingMode {
        self.mode
    }

    /// Records a latency observation for `operation`.
    pub fn record(&self, operation: OperationType, duration: Duration) {
        if let Some(accumulator) = self.accumulators.get(operation.index()) {
            accumulator.record(duration);
        }
    }

    /// Counts a failed call for `operation`.
    pub fn record_error(&self, operation: OperationType) {
        if let Some(counter) = self.errors.get(operation.index()) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Statistics for `operation`.
    #[must_use]
    pub fn stats(&self, operation: OperationType) -> LatencyStats {
        self.accumulators.get(operation.index()).map(|acc| acc.stats()).unwrap_or_default()
    }

    /// Failed calls recorded for `operation`.
    #[must_use]
    pub fn error_count(&self, operation: OperationType) -> u64 {
        self.errors.get(operation.index()).map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    /// Mergeable histogram for `operation`, when the mode keeps one.
    #[must_use]
    pub fn histogram(&self, operation: OperationType) -> Option<LatencyHistogram> {
        self.accumulators.get(operation.index()).and_then(|acc| acc.histogram())
    }

    /// Snapshot of every operation type.
    #[must_use]
    pub fn snapshot(&self) -> LatencySnapshot {
        let operations = OperationType::ALL
            .into_iter()
            .map(|op| {
                (op, OperationLatency {
                    stats: self.stats(op),
                    errors: self.error_count(op),
                })
            })
            .collect();
        LatencySnapshot {
            operations,
        }
    }
}

impl std::fmt::Debug for LatencyMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyMetrics").field("mode", &self.mode).finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
