// crates/loadgen-core/src/core/wal.rs
// ============================================================================
// Module: WAL Tracker
// Description: Periodic on-disk WAL size sampling for one database.
// Purpose: Measure WAL growth without reading WAL contents.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! The store under test keeps its write-ahead log under `{wal_dir}/{db}/`.
//! Every file whose name starts with `p` and contains `.wal` counts toward
//! the WAL size, which covers the base segment and numbered rotations. Other
//! files and subdirectories are ignored.
//!
//! A missing directory is a size of zero: the database has not written yet.
//! Samples are append-only; readers clone the sequence under a read lock.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// WAL sampling and growth-rate errors.
#[derive(Debug, Error)]
pub enum WalError {
    /// The WAL directory exists but could not be read.
    #[error("wal directory read failed for {path}: {source}")]
    Io {
        /// Directory being sampled.
        path: String,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Growth rate needs at least two samples.
    #[error("growth rate needs at least 2 samples, have {0}")]
    InsufficientSamples(usize),
    /// First and last samples were taken at the same instant.
    #[error("growth rate undefined: first and last samples share a timestamp")]
    ZeroInterval,
}

// ============================================================================
// SECTION: Samples
// ============================================================================

/// One WAL size observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalSample {
    /// When the sample was taken.
    pub taken_at: Instant,
    /// Total WAL bytes at that instant.
    pub total_bytes: u64,
}

/// WAL growth summary for one database.
///
/// # Invariants
/// - `max_bytes` is the largest size seen across all samples, even if the
///   final size is smaller after a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WalSummary {
    /// Samples taken.
    pub samples: usize,
    /// Size at the first sample.
    pub initial_bytes: u64,
    /// Size at the last sample.
    pub final_bytes: u64,
    /// Largest observed size.
    pub max_bytes: u64,
    /// `final_bytes - initial_bytes`; negative after compaction.
    pub growth_bytes: i64,
    /// Bytes per second between first and last sample, when defined.
    pub growth_rate_bytes_per_sec: Option<f64>,
}

// ============================================================================
// SECTION: Directory Scan
// ============================================================================

/// Returns true when `name` is a WAL segment name.
#[must_use]
pub fn is_wal_segment(name: &str) -> bool {
    name.starts_with('p') && name.contains(".wal")
}

/// Sums WAL segment sizes under `dir`. A missing directory yields zero.
///
/// # Errors
///
/// Returns [`WalError::Io`] when the directory exists but cannot be listed.
pub fn wal_size_bytes(dir: &Path) -> Result<u64, WalError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => {
            return Err(WalError::Io {
                path: dir.display().to_string(),
                source: err,
            });
        }
    };
    let mut total: u64 = 0;
    for entry in entries {
        let entry = entry.map_err(|err| WalError::Io {
            path: dir.display().to_string(),
            source: err,
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_wal_segment(name) {
            continue;
        }
        // Segments can be rotated away between listing and stat.
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_dir() {
            continue;
        }
        total = total.saturating_add(metadata.len());
    }
    Ok(total)
}

// ============================================================================
// SECTION: Tracker
// ============================================================================

/// Append-only WAL size sampler for one database.
#[derive(Debug)]
pub struct WalTracker {
    /// Directory holding this database's WAL segments.
    dir: PathBuf,
    /// Samples in acquisition order.
    samples: RwLock<Vec<WalSample>>,
}

impl WalTracker {
    /// Creates a tracker for `{wal_root}/{database}`.
    #[must_use]
    pub fn new(wal_root: &Path, database: &str) -> Self {
        Self {
            dir: wal_root.join(database),
            samples: RwLock::new(Vec::new()),
        }
    }

    /// Directory being sampled.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Measures the directory and appends a sample.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] when the directory exists but cannot be read.
    pub fn sample(&self) -> Result<WalSample, WalError> {
        let total_bytes = wal_size_bytes(&self.dir)?;
        Ok(self.record_sample(Instant::now(), total_bytes))
    }

    /// Appends an externally measured sample.
    pub fn record_sample(&self, taken_at: Instant, total_bytes: u64) -> WalSample {
        let sample = WalSample {
            taken_at,
            total_bytes,
        };
        self.samples.write().unwrap_or_else(PoisonError::into_inner).push(sample);
        sample
    }

    /// Copy of every sample taken so far.
    #[must_use]
    pub fn samples(&self) -> Vec<WalSample> {
        self.samples.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Bytes per second between the first and last samples.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::InsufficientSamples`] with fewer than two samples and
    /// [`WalError::ZeroInterval`] when they share a timestamp.
    pub fn growth_rate(&self) -> Result<f64, WalError> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        growth_rate_of(&samples)
    }

    /// Summarizes the samples taken so far.
    #[must_use]
    pub fn summary(&self) -> WalSummary {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
            return WalSummary::default();
        };
        let max_bytes = samples.iter().map(|s| s.total_bytes).max().unwrap_or_default();
        WalSummary {
            samples: samples.len(),
            initial_bytes: first.total_bytes,
            final_bytes: last.total_bytes,
            max_bytes,
            growth_bytes: signed_delta(first.total_bytes, last.total_bytes),
            growth_rate_bytes_per_sec: growth_rate_of(&samples).ok(),
        }
    }
}

/// Growth rate over an ordered sample slice.
fn growth_rate_of(samples: &[WalSample]) -> Result<f64, WalError> {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Err(WalError::InsufficientSamples(samples.len()));
    };
    if samples.len() < 2 {
        return Err(WalError::InsufficientSamples(samples.len()));
    }
    let seconds = last.taken_at.saturating_duration_since(first.taken_at).as_secs_f64();
    if seconds <= 0.0 {
        return Err(WalError::ZeroInterval);
    }
    #[allow(clippy::cast_precision_loss, reason = "Byte deltas stay far below 2^52.")]
    let delta = signed_delta(first.total_bytes, last.total_bytes) as f64;
    Ok(delta / seconds)
}

/// `to - from` as a saturating signed value.
fn signed_delta(from: u64, to: u64) -> i64 {
    let magnitude = i64::try_from(from.abs_diff(to)).unwrap_or(i64::MAX);
    if to >= from { magnitude } else { -magnitude }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
