// crates/loadgen-core/src/core/transition.rs
// ============================================================================
// Module: CRUD Transition
// Description: Time-interpolated operation mix between two endpoint mixes.
// Purpose: Let a workload phase shift its operation mix gradually.
// Dependencies: crate::core::operation, serde
// ============================================================================

//! ## Overview
//! A [`CrudTransition`] is a pure function of elapsed run time. Before the
//! activation offset it yields the starting mix, after `activation + duration`
//! the ending mix, and in between each field is linearly interpolated and
//! rounded on its own. The rounded fields are not renormalized, so an interior
//! mix may sum to 99 or 101.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::core::operation::CrudMix;
use crate::core::operation::MIX_TOTAL;
use crate::core::operation::ValidationError;

// ============================================================================
// SECTION: Transition
// ============================================================================

/// Linear transition between two CRUD mixes.
///
/// # Invariants
/// - `duration` is non-zero.
/// - `from` and `to` each sum to 100.
/// - `activation` is an offset from run start, not a wall-clock instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrudTransition {
    /// Mix in effect up to the activation offset.
    pub from: CrudMix,
    /// Mix in effect once the transition completes.
    pub to: CrudMix,
    /// Offset from run start at which interpolation begins.
    pub activation: Duration,
    /// Length of the interpolation window.
    pub duration: Duration,
}

impl CrudTransition {
    /// Builds a validated transition.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the duration is zero or either endpoint
    /// mix is invalid.
    pub fn new(
        from: CrudMix,
        to: CrudMix,
        activation: Duration,
        duration: Duration,
    ) -> Result<Self, ValidationError> {
        let transition = Self {
            from,
            to,
            activation,
            duration,
        };
        transition.validate()?;
        Ok(transition)
    }

    /// Checks the transition invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the duration is zero or either endpoint
    /// mix is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.duration.is_zero() {
            return Err(ValidationError::new(
                "transition.duration",
                "transition duration must be greater than zero",
            ));
        }
        self.from.validate().map_err(|err| err.within("transition.from"))?;
        self.to.validate().map_err(|err| err.within("transition.to"))?;
        Ok(())
    }

    /// Fraction of the transition completed at `elapsed`, clamped to `[0, 1]`.
    #[must_use]
    pub fn progress(&self, elapsed: Duration) -> f64 {
        if elapsed <= self.activation {
            return 0.0;
        }
        let into = elapsed.saturating_sub(self.activation);
        if into >= self.duration {
            return 1.0;
        }
        (into.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }

    /// Mix in effect at `elapsed` since run start.
    #[must_use]
    pub fn mix_at(&self, elapsed: Duration) -> CrudMix {
        if elapsed <= self.activation {
            return self.from;
        }
        if elapsed >= self.activation.saturating_add(self.duration) {
            return self.to;
        }
        let progress = self.progress(elapsed);
        CrudMix {
            create: interpolate(self.from.create, self.to.create, progress),
            read: interpolate(self.from.read, self.to.read, progress),
            update: interpolate(self.from.update, self.to.update, progress),
            delete: interpolate(self.from.delete, self.to.delete, progress),
        }
    }

    /// Returns true once the ending mix is fully in effect.
    #[must_use]
    pub fn is_complete(&self, elapsed: Duration) -> bool {
        elapsed >= self.activation.saturating_add(self.duration)
    }
}

/// Interpolates one percentage field and rounds it to the nearest integer.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Value is rounded and clamped to [0, 100] before conversion."
)]
fn interpolate(from: u32, to: u32, progress: f64) -> u32 {
    let start = f64::from(from);
    let value = (f64::from(to) - start).mul_add(progress, start);
    value.round().clamp(0.0, f64::from(MIX_TOTAL)) as u32
}

// ============================================================================
// SECTION: Tests
// ============================================================================
