// crates/loadgen-matrix/src/configuration.rs
// ============================================================================
// Module: Matrix Configurations
// Description: Cartesian sweep of database, connection, and worker counts.
// Purpose: Name every matrix cell deterministically.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A matrix cell is one combination of database count, connections per
//! database, and workers per database. Cells are named `{d}db_{c}conn_{w}w`
//! and generated in database, connection, worker order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// One matrix cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestConfiguration {
    /// Deterministic cell name.
    pub name: String,
    /// Database count.
    pub databases: u32,
    /// Connections per database.
    pub connections_per_db: u32,
    /// Workers per database.
    pub workers_per_db: u32,
}

impl TestConfiguration {
    /// Builds a named cell.
    #[must_use]
    pub fn new(databases: u32, connections_per_db: u32, workers_per_db: u32) -> Self {
        Self {
            name: configuration_name(databases, connections_per_db, workers_per_db),
            databases,
            connections_per_db,
            workers_per_db,
        }
    }

    /// Database names for the cell: `db1` through `db{d}`.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        (1..=self.databases).map(|index| format!("db{index}")).collect()
    }
}

/// Cell name for a combination.
#[must_use]
pub fn configuration_name(databases: u32, connections_per_db: u32, workers_per_db: u32) -> String {
    format!("{databases}db_{connections_per_db}conn_{workers_per_db}w")
}

/// Returns the full cartesian product of the three axes.
#[must_use]
pub fn generate_configurations(
    database_counts: &[u32],
    connection_counts: &[u32],
    worker_counts: &[u32],
) -> Vec<TestConfiguration> {
    let mut configurations = Vec::with_capacity(
        database_counts.len().saturating_mul(connection_counts.len()).saturating_mul(worker_counts.len()),
    );
    for &databases in database_counts {
        for &connections in connection_counts {
            for &workers in worker_counts {
                configurations.push(TestConfiguration::new(databases, connections, workers));
            }
        }
    }
    configurations
}

// ============================================================================
// SECTION: Tests
// ============================================================================
