// crates/loadgen-core/src/runtime/database.rs
// ============================================================================
// Module: Database Manager
// Description: Per-database contexts and their lifecycle over one run.
// Purpose: Own connections, trackers, and payload pools for every database.
// Dependencies: crate::{core, interfaces}, rand, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! A [`DatabaseManager`] exclusively owns the registry of open
//! [`DatabaseContext`]s. Workers hold only a database name and fetch the
//! context through [`DatabaseManager::get`], so closing a database never
//! leaves a worker with a dangling reference: the lookup simply misses.
//!
//! Each context owns a primary connection (used to open and close the
//! database and to fetch healing counters) plus `connections` worker
//! connections shared round-robin by the workers assigned to it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use rand::Rng;
use rand::SeedableRng;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::core::CrudMix;
use crate::core::HealingTracker;
use crate::core::LatencyMetrics;
use crate::core::SamplingMode;
use crate::core::ValidationError;
use crate::core::WalError;
use crate::core::WalTracker;
use crate::interfaces::DatabaseHandle;
use crate::interfaces::StoreConnection;
use crate::interfaces::StoreConnector;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Database manager errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A database with this name is already registered.
    #[error("database already registered: {0}")]
    Duplicate(String),
    /// No database with this name is registered.
    #[error("database not registered: {0}")]
    NotFound(String),
    /// Database configuration is invalid.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// The store under test returned an error.
    #[error("database {database}: {source}")]
    Store {
        /// Database the call targeted.
        database: String,
        /// Store error.
        source: StoreError,
    },
    /// WAL sampling failed.
    #[error("database {database}: {source}")]
    Wal {
        /// Database being sampled.
        database: String,
        /// WAL error.
        source: WalError,
    },
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for one database under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database name; also the WAL subdirectory name.
    pub name: String,
    /// Workers pinned to this database when no profile drives the pool.
    pub workers: u32,
    /// Worker connections opened in addition to the primary connection.
    pub connections: u32,
    /// Per-database mix override, honored when per-database mixes are enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crud: Option<CrudMix>,
}

impl DatabaseConfig {
    /// Builds a configuration with no mix override.
    #[must_use]
    pub fn new(name: impl Into<String>, workers: u32, connections: u32) -> Self {
        Self {
            name: name.into(),
            workers,
            connections,
            crud: None,
        }
    }

    /// Checks field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for an empty or path-like name, zero
    /// workers or connections, or an invalid mix override.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::new("name", "database name must be non-empty"));
        }
        if name != self.name || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ValidationError::new(
                "name",
                format!("database name '{}' must be a plain directory name", self.name),
            ));
        }
        if self.workers == 0 {
            return Err(ValidationError::new("workers", "workers must be greater than zero"));
        }
        if self.connections == 0 {
            return Err(ValidationError::new("connections", "connections must be greater than zero"));
        }
        if let Some(mix) = &self.crud {
            mix.validate()?;
        }
        Ok(())
    }
}

/// Validates a database list: each entry plus name uniqueness.
///
/// # Errors
///
/// Returns [`ValidationError`] naming the offending `databases[i]` entry.
pub fn validate_databases(databases: &[DatabaseConfig]) -> Result<(), ValidationError> {
    if databases.is_empty() {
        return Err(ValidationError::new("databases", "at least one database is required"));
    }
    let mut seen = BTreeSet::new();
    for (index, database) in databases.iter().enumerate() {
        let field = format!("databases[{index}]");
        database.validate().map_err(|err| err.within(&field))?;
        if !seen.insert(database.name.as_str()) {
            return Err(ValidationError::new(
                format!("{field}.name"),
                format!("duplicate database name '{}'", database.name),
            ));
        }
    }
    Ok(())
}

/// Generated document payload settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSettings {
    /// Bytes per generated payload.
    pub doc_size: usize,
    /// Payloads pre-generated per database.
    pub pool_size: usize,
    /// Seed for payload generation.
    pub seed: u64,
}

impl Default for PayloadSettings {
    fn default() -> Self {
        Self {
            doc_size: 1_024,
            pool_size: 100,
            seed: 42,
        }
    }
}

impl PayloadSettings {
    /// Checks field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the size or pool size is zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.doc_size == 0 {
            return Err(ValidationError::new("doc_size", "document size must be greater than zero"));
        }
        if self.pool_size == 0 {
            return Err(ValidationError::new(
                "payload_pool_size",
                "payload pool size must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Settings shared by every context a manager builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Root directory holding one WAL subdirectory per database.
    pub wal_root: PathBuf,
    /// Latency accumulator strategy.
    pub sampling: SamplingMode,
    /// Payload generation settings.
    pub payload: PayloadSettings,
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Live state for one database under test.
pub struct DatabaseContext {
    /// Database configuration.
    config: DatabaseConfig,
    /// Store handle returned by `open_database`.
    handle: DatabaseHandle,
    /// Connection that opened the database.
    primary: Arc<dyn StoreConnection>,
    /// Worker connections.
    connections: Vec<Arc<dyn StoreConnection>>,
    /// Latency and error accumulators.
    latency: LatencyMetrics,
    /// WAL size sampler.
    wal: WalTracker,
    /// Healing counter tracker.
    healing: HealingTracker,
    /// Pre-generated payloads.
    payloads: Vec<Vec<u8>>,
}

impl DatabaseContext {
    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Database configuration.
    #[must_use]
    pub const fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Store handle.
    #[must_use]
    pub const fn handle(&self) -> &DatabaseHandle {
        &self.handle
    }

    /// Primary connection.
    #[must_use]
    pub fn primary(&self) -> &dyn StoreConnection {
        self.primary.as_ref()
    }

    /// Worker connection for a slot; slots wrap round-robin over the pool.
    #[must_use]
    pub fn connection(&self, slot: usize) -> &dyn StoreConnection {
        let len = self.connections.len();
        if len == 0 {
            return self.primary.as_ref();
        }
        self.connections.get(slot % len).map_or(self.primary.as_ref(), AsRef::as_ref)
    }

    /// Number of worker connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Latency metrics.
    #[must_use]
    pub const fn latency(&self) -> &LatencyMetrics {
        &self.latency
    }

    /// WAL tracker.
    #[must_use]
    pub const fn wal(&self) -> &WalTracker {
        &self.wal
    }

    /// Healing tracker.
    #[must_use]
    pub const fn healing(&self) -> &HealingTracker {
        &self.healing
    }

    /// Payload at `index`, wrapping over the pool.
    #[must_use]
    pub fn payload(&self, index: usize) -> &[u8] {
        let len = self.payloads.len();
        if len == 0 {
            return &[];
        }
        self.payloads.get(index % len).map_or(&[], Vec::as_slice)
    }

    /// Number of pre-generated payloads.
    #[must_use]
    pub fn payload_count(&self) -> usize {
        self.payloads.len()
    }

    /// Closes the database and every connection, attempting all of them.
    async fn close(&self) -> Result<(), StoreError> {
        let mut first_error = self.primary.close_database(&self.handle).await.err();
        for connection in &self.connections {
            if let Err(err) = connection.close().await {
                first_error.get_or_insert(err);
            }
        }
        if let Err(err) = self.primary.close().await {
            first_error.get_or_insert(err);
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for DatabaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseContext")
            .field("config", &self.config)
            .field("handle", &self.handle)
            .field("connections", &self.connections.len())
            .field("payloads", &self.payloads.len())
            .finish_non_exhaustive()
    }
}

/// Generates `settings.pool_size` alphanumeric payloads for `database`.
fn generate_payloads(settings: &PayloadSettings, database: &str) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(settings.seed ^ fnv1a(database.as_bytes()));
    (0 .. settings.pool_size)
        .map(|_| (&mut rng).sample_iter(Alphanumeric).take(settings.doc_size).collect())
        .collect()
}

/// 64-bit FNV-1a hash.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Registry of open databases for one run.
pub struct DatabaseManager {
    /// Connector for the store under test.
    connector: Arc<dyn StoreConnector>,
    /// Settings applied to every context.
    settings: ManagerSettings,
    /// Open contexts keyed by name.
    registry: RwLock<BTreeMap<String, Arc<DatabaseContext>>>,
}

impl DatabaseManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(connector: Arc<dyn StoreConnector>, settings: ManagerSettings) -> Self {
        Self {
            connector,
            settings,
            registry: RwLock::new(BTreeMap::new()),
        }
    }

    /// Root directory for WAL subdirectories.
    #[must_use]
    pub fn wal_root(&self) -> &Path {
        &self.settings.wal_root
    }

    /// Opens a database and registers its context.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Duplicate`] when the name is already
    /// registered, [`DatabaseError::Invalid`] for bad configuration, and
    /// [`DatabaseError::Store`] when opening fails. Connections opened before
    /// a failure are closed again.
    pub async fn add_database(&self, config: DatabaseConfig) -> Result<Arc<DatabaseContext>, DatabaseError> {
        config.validate()?;
        if self.contains(&config.name) {
            return Err(DatabaseError::Duplicate(config.name));
        }
        let store_err = |source| DatabaseError::Store {
            database: config.name.clone(),
            source,
        };

        let primary = self.connector.connect().await.map_err(store_err)?;
        let handle = match primary.open_database(&config.name).await {
            Ok(handle) => handle,
            Err(err) => {
                close_quietly(primary.as_ref(), &config.name).await;
                return Err(store_err(err));
            }
        };
        let mut connections = Vec::new();
        for _ in 0 .. config.connections {
            match self.connector.connect().await {
                Ok(connection) => connections.push(connection),
                Err(err) => {
                    for connection in &connections {
                        close_quietly(connection.as_ref(), &config.name).await;
                    }
                    if let Err(close_err) = primary.close_database(&handle).await {
                        debug!(database = %config.name, error = %close_err, "close after failed open");
                    }
                    close_quietly(primary.as_ref(), &config.name).await;
                    return Err(store_err(err));
                }
            }
        }

        let context = Arc::new(DatabaseContext {
            wal: WalTracker::new(&self.settings.wal_root, &config.name),
            latency: LatencyMetrics::new(self.settings.sampling),
            healing: HealingTracker::new(),
            payloads: generate_payloads(&self.settings.payload, &config.name),
            config,
            handle,
            primary,
            connections,
        });

        let inserted = {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            if registry.contains_key(context.name()) {
                false
            } else {
                registry.insert(context.name().to_string(), Arc::clone(&context));
                true
            }
        };
        if !inserted {
            if let Err(err) = context.close().await {
                debug!(database = %context.name(), error = %err, "close after duplicate open");
            }
            return Err(DatabaseError::Duplicate(context.name().to_string()));
        }
        info!(
            database = %context.name(),
            id = context.handle.id,
            connections = context.connection_count(),
            "database opened"
        );
        Ok(context)
    }

    /// Returns true when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    /// Context for `name`, if registered.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<DatabaseContext>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }

    /// Registered contexts in name order.
    #[must_use]
    pub fn contexts(&self) -> Vec<Arc<DatabaseContext>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    /// Number of registered databases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when no database is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes one WAL sample for every database.
    ///
    /// Every database is sampled even after a failure.
    ///
    /// # Errors
    ///
    /// Returns the first [`DatabaseError::Wal`] encountered.
    pub fn sample_wal_all(&self) -> Result<(), DatabaseError> {
        let mut first_error = None;
        for context in self.contexts() {
            if let Err(source) = context.wal().sample() {
                first_error.get_or_insert(DatabaseError::Wal {
                    database: context.name().to_string(),
                    source,
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Fetches the initial healing snapshot for every database.
    ///
    /// # Errors
    ///
    /// Returns the first [`DatabaseError::Store`] encountered.
    pub async fn start_healing_all(&self) -> Result<(), DatabaseError> {
        let mut first_error = None;
        for context in self.contexts() {
            if let Err(source) = context.healing.start(context.primary(), &context.handle).await {
                first_error.get_or_insert(DatabaseError::Store {
                    database: context.name().to_string(),
                    source,
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Fetches the final healing snapshot for every database.
    ///
    /// # Errors
    ///
    /// Returns the first [`DatabaseError::Store`] encountered.
    pub async fn stop_healing_all(&self) -> Result<(), DatabaseError> {
        let mut first_error = None;
        for context in self.contexts() {
            if let Err(source) = context.healing.stop(context.primary(), &context.handle).await {
                first_error.get_or_insert(DatabaseError::Store {
                    database: context.name().to_string(),
                    source,
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Closes every database and clears the registry.
    ///
    /// Every context is closed even after a failure.
    ///
    /// # Errors
    ///
    /// Returns the first [`DatabaseError::Store`] encountered.
    pub async fn close_all(&self) -> Result<(), DatabaseError> {
        let contexts: Vec<Arc<DatabaseContext>> = {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *registry).into_values().collect()
        };
        let mut first_error = None;
        for context in contexts {
            match context.close().await {
                Ok(()) => info!(database = %context.name(), "database closed"),
                Err(source) => {
                    warn!(database = %context.name(), error = %source, "database close failed");
                    first_error.get_or_insert(DatabaseError::Store {
                        database: context.name().to_string(),
                        source,
                    });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("settings", &self.settings)
            .field("databases", &self.names())
            .finish_non_exhaustive()
    }
}

/// Closes a connection, logging rather than returning a failure.
async fn close_quietly(connection: &dyn StoreConnection, database: &str) {
    if let Err(err) = connection.close().await {
        debug!(database, error = %err, "connection close failed during cleanup");
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
