// crates/loadgen-core/tests/latency_metrics.rs
// ============================================================================
// Module: Latency Metrics Tests
// Description: Percentile math, accumulator modes, and error counters.
// ============================================================================
//! ## Overview
//! Validates exact statistics and the bounded and mergeable accumulators.

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

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use loadgen_core::LatencyAccumulator;
use loadgen_core::LatencyMetrics;
use loadgen_core::OperationType;
use loadgen_core::ReservoirAccumulator;
use loadgen_core::SamplingMode;
use loadgen_core::percentile;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

// ============================================================================
// SECTION: Exact
// ============================================================================

#[test]
fn percentile_of_five_samples() {
    let samples: Vec<Duration> = [10, 20, 30, 40, 50].into_iter().map(ms).collect();
    assert_eq!(percentile(&samples, 0.5), ms(30));
    assert_eq!(percentile(&samples, 0.0), ms(10));
    assert_eq!(percentile(&samples, 1.0), ms(50));
}

#[test]
fn exact_stats_use_running_totals() {
    let metrics = LatencyMetrics::new(SamplingMode::Exact);
    for value in [50, 10, 40, 20, 30] {
        metrics.record(OperationType::Read, ms(value));
    }
    let stats = metrics.stats(OperationType::Read);
    assert_eq!(stats.count, 5);
    assert_eq!(stats.total, ms(150));
    assert_eq!(stats.mean, ms(30));
    assert_eq!(stats.min, ms(10));
    assert_eq!(stats.max, ms(50));
    assert_eq!(stats.p50, ms(30));
    assert!(stats.p95 <= stats.p99 && stats.p99 <= stats.p999 && stats.p999 <= stats.max);
}

#[test]
fn empty_operation_yields_zeroed_stats() {
    let metrics = LatencyMetrics::new(SamplingMode::Exact);
    let stats = metrics.stats(OperationType::Delete);
    assert_eq!(stats.count, 0);
    assert_eq!(stats.p99, Duration::ZERO);
    assert_eq!(metrics.snapshot().total_operations(), 0);
}

#[test]
fn errors_are_counted_next_to_latency() {
    let metrics = LatencyMetrics::new(SamplingMode::Exact);
    metrics.record(OperationType::Update, ms(5));
    metrics.record_error(OperationType::Update);
    metrics.record(OperationType::Create, ms(1));
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_operations(), 2);
    assert_eq!(snapshot.total_errors(), 1);
    assert_eq!(metrics.error_count(OperationType::Update), 1);
    assert_eq!(metrics.error_count(OperationType::Create), 0);
}

#[test]
fn concurrent_recording_keeps_counts_consistent() {
    let metrics = Arc::new(LatencyMetrics::new(SamplingMode::Exact));
    let threads: Vec<_> = (0 .. 4)
        .map(|_| {
            let metrics = Arc::clone(&metrics);
            thread::spawn(move || {
                for value in 1 ..= 250 {
                    metrics.record(OperationType::Read, Duration::from_micros(value));
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }
    let stats = metrics.stats(OperationType::Read);
    assert_eq!(stats.count, 1_000);
    assert_eq!(stats.min, Duration::from_micros(1));
    assert_eq!(stats.max, Duration::from_micros(250));
}

// ============================================================================
// SECTION: Reservoir
// ============================================================================

#[test]
fn reservoir_bounds_memory_but_keeps_exact_totals() {
    let reservoir = ReservoirAccumulator::new(64, 7);
    for value in 1 ..= 10_000 {
        reservoir.record(Duration::from_micros(value));
    }
    assert_eq!(reservoir.retained(), 64);
    let stats = reservoir.stats();
    assert_eq!(stats.count, 10_000);
    assert_eq!(stats.min, Duration::from_micros(1));
    assert_eq!(stats.max, Duration::from_micros(10_000));
    assert!(stats.p50 > Duration::from_micros(2_000) && stats.p50 < Duration::from_micros(8_000));
}

#[test]
fn reservoir_mode_rejects_zero_capacity() {
    let mode = SamplingMode::Reservoir {
        capacity: 0,
        seed: 1,
    };
    assert_eq!(mode.validate().unwrap_err().field, "sampling.reservoir_capacity");
}

// ============================================================================
// SECTION: Histogram
// ============================================================================

#[test]
fn histogram_mode_estimates_within_bucket_error() {
    let metrics = LatencyMetrics::new(SamplingMode::Histogram);
    for value in 1 ..= 1_000 {
        metrics.record(OperationType::Read, Duration::from_micros(value));
    }
    let stats = metrics.stats(OperationType::Read);
    assert_eq!(stats.count, 1_000);
    let p95 = stats.p95.as_secs_f64();
    assert!((p95 - 0.000_950).abs() / 0.000_950 < 0.04, "p95 {p95}");
    assert!(metrics.histogram(OperationType::Read).is_some());
    assert!(LatencyMetrics::new(SamplingMode::Exact).histogram(OperationType::Read).is_none());
}
