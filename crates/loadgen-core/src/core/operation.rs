// crates/loadgen-core/src/core/operation.rs
// ============================================================================
// Module: Operation Types and CRUD Mix
// Description: Operation type enum and percentage-based operation mix.
// Purpose: Provide the immutable value types every workload component keys on.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! [`OperationType`] is the key used by every metrics map in the engine.
//! [`CrudMix`] is a percentage split across the four operation types. Mixes
//! read from configuration must sum to exactly 100; mixes produced by
//! interpolation are rounded per field and may drift by one point.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Total every configured mix must sum to.
pub const MIX_TOTAL: u32 = 100;

// ============================================================================
// SECTION: Validation Error
// ============================================================================

/// Validation failure reported as a single field and message pair.
///
/// # Invariants
/// - `field` names the offending configuration path (for example `phases[1].workers`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    /// Offending field path.
    pub field: String,
    /// Human-readable failure description.
    pub message: String,
}

impl ValidationError {
    /// Creates a validation error for a field.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns the same error with `prefix` prepended to the field path.
    #[must_use]
    pub fn within(self, prefix: &str) -> Self {
        Self {
            field: format!("{prefix}.{}", self.field),
            message: self.message,
        }
    }
}

// ============================================================================
// SECTION: Operation Type
// ============================================================================

/// Store operation issued by a worker.
///
/// # Invariants
/// - Variants are stable for report keys and persisted labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Insert a document.
    Create,
    /// Fetch a document.
    Read,
    /// Overwrite a document.
    Update,
    /// Remove a document.
    Delete,
}

impl OperationType {
    /// All operation types in index order.
    pub const ALL: [Self; 4] = [Self::Create, Self::Read, Self::Update, Self::Delete];

    /// Returns a stable label for the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Returns the dense index used by fixed-size per-operation arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Create => 0,
            Self::Read => 1,
            Self::Update => 2,
            Self::Delete => 3,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: CRUD Mix
// ============================================================================

/// Percentage split of operations across create, read, update and delete.
///
/// # Invariants
/// - Mixes accepted by [`CrudMix::new`] or [`CrudMix::validate`] sum to [`MIX_TOTAL`].
/// - Interpolated mixes (see [`crate::CrudTransition`]) are not renormalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrudMix {
    /// Create percentage.
    pub create: u32,
    /// Read percentage.
    pub read: u32,
    /// Update percentage.
    pub update: u32,
    /// Delete percentage.
    pub delete: u32,
}

impl CrudMix {
    /// Mix used when neither a database override nor a profile supplies one.
    pub const DEFAULT: Self = Self {
        create: 30,
        read: 40,
        update: 20,
        delete: 10,
    };

    /// Builds a validated mix.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the percentages do not sum to 100.
    pub fn new(create: u32, read: u32, update: u32, delete: u32) -> Result<Self, ValidationError> {
        let mix = Self {
            create,
            read,
            update,
            delete,
        };
        mix.validate()?;
        Ok(mix)
    }

    /// Sum of the four percentages.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.create.saturating_add(self.read).saturating_add(self.update).saturating_add(self.delete)
    }

    /// Percentage assigned to `operation`.
    #[must_use]
    pub const fn percent(&self, operation: OperationType) -> u32 {
        match operation {
            OperationType::Create => self.create,
            OperationType::Read => self.read,
            OperationType::Update => self.update,
            OperationType::Delete => self.delete,
        }
    }

    /// Checks the sum-to-100 invariant.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the percentages do not sum to 100.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let total = self.total();
        if total != MIX_TOTAL {
            return Err(ValidationError::new(
                "crud",
                format!(
                    "percentages must sum to {MIX_TOTAL} (create {} + read {} + update {} + \
                     delete {} = {total})",
                    self.create, self.read, self.update, self.delete
                ),
            ));
        }
        Ok(())
    }

    /// Maps a uniform draw in `[0, 100)` to an operation type.
    ///
    /// Bands are laid out read, create, update, delete. Each band is half-open,
    /// so a draw equal to a cumulative threshold starts the next band and each
    /// band holds exactly its percentage of the draw space. Draws past the
    /// final threshold (possible for interpolated mixes summing below 100)
    /// fall into delete.
    #[must_use]
    pub const fn select(&self, draw: u32) -> OperationType {
        let read_end = self.read;
        let create_end = read_end.saturating_add(self.create);
        let update_end = create_end.saturating_add(self.update);
        if draw < read_end {
            OperationType::Read
        } else if draw < create_end {
            OperationType::Create
        } else if draw < update_end {
            OperationType::Update
        } else {
            OperationType::Delete
        }
    }
}

impl Default for CrudMix {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for CrudMix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "create={} read={} update={} delete={}",
            self.create, self.read, self.update, self.delete
        )
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
