// crates/loadgen-config/src/overrides.rs
// ============================================================================
// Module: Run Overrides
// Description: Command-line overrides layered over file configuration.
// Purpose: Let one invocation replace the per-run parameters of a config.
// Dependencies: loadgen-core
// ============================================================================

//! ## Overview
//! Overrides carry the per-run parameters a single invocation may set on the
//! command line: the database list, workers and connections per database,
//! run length, CRUD percentages, document size and count, and output paths.
//! Applying overrides leaves unset fields untouched and revalidates.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use loadgen_core::CrudMix;
use loadgen_core::DatabaseConfig;

use crate::config::ConfigError;
use crate::config::LoadgenConfig;

// ============================================================================
// SECTION: Overrides
// ============================================================================

/// Per-run values that replace file configuration when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    /// Replacement database list.
    pub databases: Option<Vec<String>>,
    /// Workers per database.
    pub workers: Option<u32>,
    /// Connections per database.
    pub connections: Option<u32>,
    /// Run length in seconds.
    pub duration_secs: Option<u64>,
    /// Default CRUD mix.
    pub crud: Option<CrudMix>,
    /// Bytes per generated payload.
    pub doc_size: Option<usize>,
    /// Size of the document id space.
    pub doc_count: Option<u64>,
    /// JSON report path.
    pub output: Option<PathBuf>,
    /// WAL root.
    pub wal_dir: Option<PathBuf>,
    /// Store address.
    pub store_address: Option<String>,
}

impl RunOverrides {
    /// Returns true when no override is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies the overrides to `config` and revalidates it.
    ///
    /// A replacement database list takes `workers` and `connections` from
    /// the overrides, else 1 each. Without a replacement list, `workers`
    /// and `connections` apply to every configured database.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the result fails validation.
    pub fn apply(&self, config: &mut LoadgenConfig) -> Result<(), ConfigError> {
        if let Some(names) = &self.databases {
            config.databases = names
                .iter()
                .map(|name| {
                    DatabaseConfig::new(
                        name.clone(),
                        self.workers.unwrap_or(1),
                        self.connections.unwrap_or(1),
                    )
                })
                .collect();
        } else {
            for database in &mut config.databases {
                if let Some(workers) = self.workers {
                    database.workers = workers;
                }
                if let Some(connections) = self.connections {
                    database.connections = connections;
                }
            }
        }
        if let Some(duration) = self.duration_secs {
            config.run.duration_secs = duration;
        }
        if let Some(mix) = self.crud {
            config.crud = Some(mix);
        }
        if let Some(doc_size) = self.doc_size {
            config.run.doc_size = doc_size;
        }
        if let Some(doc_count) = self.doc_count {
            config.run.doc_count = doc_count;
        }
        if let Some(output) = &self.output {
            config.run.output = Some(output.clone());
        }
        if let Some(wal_dir) = &self.wal_dir {
            config.run.wal_dir.clone_from(wal_dir);
        }
        if let Some(address) = &self.store_address {
            config.store.address.clone_from(address);
        }
        config.validate()
    }
}
