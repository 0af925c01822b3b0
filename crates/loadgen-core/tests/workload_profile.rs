// crates/loadgen-core/tests/workload_profile.rs
// ============================================================================
// Module: Workload Profile Tests
// Description: Phase lookup, sticky end-state, and validation.
// ============================================================================
//! ## Overview
//! Validates phase resolution as a pure function of elapsed time.

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

use std::time::Duration;

use loadgen_core::CrudMix;
use loadgen_core::CrudTransition;
use loadgen_core::MixSpec;
use loadgen_core::WorkloadPhase;
use loadgen_core::WorkloadProfile;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn phase(name: &str, start: u64, duration: u64, workers: u32, mix: MixSpec) -> WorkloadPhase {
    WorkloadPhase {
        name: name.to_string(),
        start: Duration::from_secs(start),
        duration: Duration::from_secs(duration),
        workers,
        mix,
        target_ops_per_sec: None,
    }
}

fn fixed(create: u32, read: u32, update: u32, delete: u32) -> MixSpec {
    MixSpec::Fixed(CrudMix::new(create, read, update, delete).unwrap())
}

// ============================================================================
// SECTION: Phase Lookup
// ============================================================================

#[test]
fn single_phase_is_sticky_after_its_end() {
    let profile = WorkloadProfile::new(vec![phase("only", 0, 60, 4, fixed(25, 25, 25, 25))]).unwrap();
    assert_eq!(profile.current_phase(Duration::from_secs(30)).unwrap().name, "only");
    assert_eq!(profile.current_phase(Duration::from_secs(90)).unwrap().name, "only");
    assert_eq!(profile.current_worker_count(Duration::from_secs(3_600)), Some(4));
}

#[test]
fn nothing_is_active_before_the_first_phase() {
    let profile = WorkloadProfile::new(vec![phase("late", 10, 60, 4, fixed(25, 25, 25, 25))]).unwrap();
    assert!(profile.current_phase(Duration::from_secs(9)).is_none());
    assert!(profile.current_mix(Duration::ZERO).is_none());
    assert!(profile.current_worker_count(Duration::ZERO).is_none());
}

#[test]
fn phases_are_half_open_intervals() {
    let profile = WorkloadProfile::new(vec![
        phase("warmup", 0, 10, 2, fixed(100, 0, 0, 0)),
        phase("steady", 10, 20, 8, fixed(10, 70, 10, 10)),
    ])
    .unwrap();
    assert_eq!(profile.current_phase(Duration::from_millis(9_999)).unwrap().name, "warmup");
    assert_eq!(profile.current_phase(Duration::from_secs(10)).unwrap().name, "steady");
    assert_eq!(profile.current_worker_count(Duration::from_secs(10)), Some(8));
    assert_eq!(profile.total_duration(), Duration::from_secs(30));
}

#[test]
fn gap_between_phases_has_no_active_phase() {
    let profile = WorkloadProfile::new(vec![
        phase("a", 0, 10, 1, fixed(25, 25, 25, 25)),
        phase("b", 20, 10, 1, fixed(25, 25, 25, 25)),
    ])
    .unwrap();
    assert!(profile.current_phase(Duration::from_secs(15)).is_none());
    assert_eq!(profile.current_phase(Duration::from_secs(45)).unwrap().name, "b");
}

#[test]
fn transition_phase_interpolates_mix() {
    let transition = CrudTransition::new(
        CrudMix::new(80, 10, 5, 5).unwrap(),
        CrudMix::new(10, 80, 5, 5).unwrap(),
        Duration::ZERO,
        Duration::from_secs(300),
    )
    .unwrap();
    let profile =
        WorkloadProfile::new(vec![phase("shift", 0, 600, 4, MixSpec::Transition(transition))]).unwrap();
    let mix = profile.current_mix(Duration::from_secs(150)).unwrap();
    assert_eq!((mix.create, mix.read, mix.update, mix.delete), (45, 45, 5, 5));
}

#[test]
fn target_rate_is_reported_per_phase() {
    let mut steady = phase("steady", 0, 60, 4, fixed(25, 25, 25, 25));
    steady.target_ops_per_sec = Some(500.0);
    let profile = WorkloadProfile::new(vec![steady]).unwrap();
    assert_eq!(profile.current_operation_rate(Duration::from_secs(1)), Some(500.0));
}

// ============================================================================
// SECTION: Validation
// ============================================================================

#[test]
fn overlapping_phases_are_rejected() {
    let err = WorkloadProfile::new(vec![
        phase("a", 0, 30, 1, fixed(25, 25, 25, 25)),
        phase("b", 20, 30, 1, fixed(25, 25, 25, 25)),
    ])
    .unwrap_err();
    assert_eq!(err.field, "phases[1].start");
}

#[test]
fn invalid_phase_fields_are_reported_with_their_index() {
    let err = WorkloadProfile::new(vec![
        phase("a", 0, 30, 1, fixed(25, 25, 25, 25)),
        phase("b", 30, 30, 0, fixed(25, 25, 25, 25)),
    ])
    .unwrap_err();
    assert_eq!(err.field, "phases[1].workers");

    let bad_mix = MixSpec::Fixed(CrudMix {
        create: 50,
        read: 50,
        update: 50,
        delete: 0,
    });
    let err = WorkloadProfile::new(vec![phase("a", 0, 30, 1, bad_mix)]).unwrap_err();
    assert_eq!(err.field, "phases[0].crud");

    let err = WorkloadProfile::new(Vec::new()).unwrap_err();
    assert_eq!(err.field, "phases");
}
