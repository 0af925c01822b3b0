// crates/loadgen-core/src/core/profile.rs
// ============================================================================
// Module: Workload Profile
// Description: Ordered, time-bounded workload phases.
// Purpose: Resolve the active phase, mix, worker count, and rate from elapsed time.
// Dependencies: crate::core::{operation, transition}, serde
// ============================================================================

//! ## Overview
//! A [`WorkloadProfile`] is built once from configuration and read-only for
//! the rest of a run. The current phase is a pure function of elapsed time:
//! the phase whose `[start, start + duration)` interval contains it, the last
//! phase once every phase has ended (sticky end-state), or none before the
//! first phase begins.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::core::operation::CrudMix;
use crate::core::operation::ValidationError;
use crate::core::transition::CrudTransition;

// ============================================================================
// SECTION: Mix Definitions
// ============================================================================

/// Operation mix carried by a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixSpec {
    /// A constant mix for the whole phase.
    Fixed(CrudMix),
    /// A mix that shifts over time.
    Transition(CrudTransition),
}

impl MixSpec {
    /// Mix in effect at `elapsed` since run start.
    #[must_use]
    pub fn mix_at(&self, elapsed: Duration) -> CrudMix {
        match self {
            Self::Fixed(mix) => *mix,
            Self::Transition(transition) => transition.mix_at(elapsed),
        }
    }

    /// Validates the fixed mix or both transition endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the mix or transition is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Fixed(mix) => mix.validate(),
            Self::Transition(transition) => transition.validate(),
        }
    }
}

// ============================================================================
// SECTION: Phase
// ============================================================================

/// One time-bounded segment of a workload profile.
///
/// # Invariants
/// - `workers` and `duration` are greater than zero.
/// - `start` is an offset from run start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadPhase {
    /// Phase label used for per-phase operation counts.
    pub name: String,
    /// Offset from run start at which the phase begins.
    pub start: Duration,
    /// Length of the phase.
    pub duration: Duration,
    /// Total workers the pool should run during the phase.
    pub workers: u32,
    /// Operation mix for the phase.
    pub mix: MixSpec,
    /// Optional target operation rate; reported, not enforced.
    pub target_ops_per_sec: Option<f64>,
}

impl WorkloadPhase {
    /// Offset at which the phase ends (exclusive).
    #[must_use]
    pub fn end(&self) -> Duration {
        self.start.saturating_add(self.duration)
    }

    /// Returns true when `elapsed` falls inside `[start, end)`.
    #[must_use]
    pub fn contains(&self, elapsed: Duration) -> bool {
        elapsed >= self.start && elapsed < self.end()
    }

    /// Checks per-phase invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when a field is out of range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "phase name must be non-empty"));
        }
        if self.duration.is_zero() {
            return Err(ValidationError::new("duration", "phase duration must be greater than zero"));
        }
        if self.workers == 0 {
            return Err(ValidationError::new("workers", "phase workers must be greater than zero"));
        }
        if let Some(rate) = self.target_ops_per_sec
            && !(rate.is_finite() && rate > 0.0)
        {
            return Err(ValidationError::new(
                "target_ops_per_sec",
                "target rate must be a positive finite number",
            ));
        }
        self.mix.validate()
    }
}

// ============================================================================
// SECTION: Profile
// ============================================================================

/// Ordered, non-overlapping set of workload phases.
///
/// # Invariants
/// - At least one phase.
/// - `phases[i].start >= phases[i - 1].start + phases[i - 1].duration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadProfile {
    /// Phases in start order.
    phases: Vec<WorkloadPhase>,
}

impl WorkloadProfile {
    /// Builds a validated profile.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when a phase is invalid or phases overlap.
    pub fn new(phases: Vec<WorkloadPhase>) -> Result<Self, ValidationError> {
        let profile = Self {
            phases,
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Checks ordering, overlap, and per-phase invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] naming the offending phase.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.phases.is_empty() {
            return Err(ValidationError::new("phases", "profile must declare at least one phase"));
        }
        let mut previous: Option<&WorkloadPhase> = None;
        for (index, phase) in self.phases.iter().enumerate() {
            let field = format!("phases[{index}]");
            phase.validate().map_err(|err| err.within(&field))?;
            if let Some(prev) = previous
                && phase.start < prev.end()
            {
                return Err(ValidationError::new(
                    format!("{field}.start"),
                    format!(
                        "phase '{}' starts at {}s before phase '{}' ends at {}s",
                        phase.name,
                        phase.start.as_secs_f64(),
                        prev.name,
                        prev.end().as_secs_f64()
                    ),
                ));
            }
            previous = Some(phase);
        }
        Ok(())
    }

    /// Phases in start order.
    #[must_use]
    pub fn phases(&self) -> &[WorkloadPhase] {
        &self.phases
    }

    /// Offset at which the last phase ends.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.phases.last().map_or(Duration::ZERO, WorkloadPhase::end)
    }

    /// Phase active at `elapsed`.
    ///
    /// Returns the last phase once every phase has ended, and `None` before
    /// the first phase starts or inside a gap between phases.
    #[must_use]
    pub fn current_phase(&self, elapsed: Duration) -> Option<&WorkloadPhase> {
        if let Some(phase) = self.phases.iter().find(|phase| phase.contains(elapsed)) {
            return Some(phase);
        }
        self.phases.last().filter(|last| elapsed >= last.end())
    }

    /// Mix in effect at `elapsed`.
    #[must_use]
    pub fn current_mix(&self, elapsed: Duration) -> Option<CrudMix> {
        self.current_phase(elapsed).map(|phase| phase.mix.mix_at(elapsed))
    }

    /// Worker count requested at `elapsed`.
    #[must_use]
    pub fn current_worker_count(&self, elapsed: Duration) -> Option<u32> {
        self.current_phase(elapsed).map(|phase| phase.workers)
    }

    /// Target operation rate at `elapsed`, when the active phase declares one.
    #[must_use]
    pub fn current_operation_rate(&self, elapsed: Duration) -> Option<f64> {
        self.current_phase(elapsed).and_then(|phase| phase.target_ops_per_sec)
    }
}
