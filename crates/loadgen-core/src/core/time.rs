// crates/loadgen-core/src/core/time.rs
// ============================================================================
// Module: Time Helpers
// Description: Run clock and millisecond serialization for durations.
// Purpose: Keep elapsed-time math and report encoding in one place.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every time-dependent decision in a run (phase lookup, mix interpolation,
//! throughput) is a function of elapsed time measured by a [`RunClock`].
//! Reports encode durations as fractional milliseconds through [`duration_ms`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

// ============================================================================
// SECTION: Run Clock
// ============================================================================

/// Monotonic clock anchored at run start.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    /// Instant the run started.
    started: Instant,
}

impl RunClock {
    /// Starts a clock at the current instant.
    #[must_use]
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Starts a clock at a caller-provided instant.
    #[must_use]
    pub const fn starting_at(started: Instant) -> Self {
        Self {
            started,
        }
    }

    /// Instant the run started.
    #[must_use]
    pub const fn started(&self) -> Instant {
        self.started
    }

    /// Time elapsed since run start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Returns the current unix epoch in milliseconds.
#[must_use]
pub fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

/// Converts a duration to fractional milliseconds.
#[must_use]
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

// ============================================================================
// SECTION: Serde
// ============================================================================

/// Serializes a [`Duration`] as fractional milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;
    use serde::de::Error;

    /// Serializes `duration` as milliseconds.
    ///
    /// # Errors
    ///
    /// Returns the serializer error when writing fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(super::as_millis_f64(*duration))
    }

    /// Deserializes milliseconds into a [`Duration`].
    ///
    /// # Errors
    ///
    /// Returns a deserializer error for negative or non-finite values.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(millis / 1_000.0)
            .map_err(|err| D::Error::custom(format!("invalid duration: {err}")))
    }
}
