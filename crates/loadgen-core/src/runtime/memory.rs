// crates/loadgen-core/src/runtime/memory.rs
// ============================================================================
// Module: In-Memory Store
// Description: Deterministic store-under-test double.
// Purpose: Exercise the engine end to end without an external store.
// Dependencies: crate::{core, interfaces}, async-trait, tokio
// ============================================================================

//! ## Overview
//! [`InMemoryStore`] keeps documents in per-database maps. Create and update
//! upsert, delete of a missing document succeeds, and read of a missing
//! document returns `None`, so random traffic never fails on its own.
//! Failures are injected per operation type, and database closes can be
//! made to fail per database. When a WAL directory is set,
//! each write appends bytes to `{wal_dir}/{db}/p0.wal`. Healing counters can
//! be scripted per database; each fetch consumes the next scripted snapshot
//! and the last one repeats.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::HealingStats;
use crate::core::OperationType;
use crate::interfaces::DatabaseHandle;
use crate::interfaces::StoreConnection;
use crate::interfaces::StoreConnector;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: State
// ============================================================================

/// One in-memory database.
#[derive(Debug, Default)]
struct MemoryDatabase {
    /// Store-assigned identifier.
    id: u64,
    /// Whether the database is open.
    open: bool,
    /// Documents keyed by `(collection, doc_id)`.
    documents: BTreeMap<(String, String), Vec<u8>>,
    /// Scripted healing snapshots.
    healing: VecDeque<HealingStats>,
}

/// State shared by the store and its connections.
#[derive(Debug, Default)]
struct MemoryState {
    /// Databases keyed by name.
    databases: BTreeMap<String, MemoryDatabase>,
    /// Operation types that fail.
    failing: BTreeSet<OperationType>,
    /// Databases whose close fails.
    failing_close: BTreeSet<String>,
    /// Next database identifier.
    next_id: u64,
}

/// Shared internals.
#[derive(Debug, Default)]
struct MemoryInner {
    /// Mutable store state.
    state: Mutex<MemoryState>,
    /// Optional WAL root.
    wal_dir: Option<PathBuf>,
    /// Delay applied to every document operation.
    delay: Option<Duration>,
    /// Connections opened.
    opened: AtomicU64,
    /// Connections closed.
    closed: AtomicU64,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// In-memory store implementing [`StoreConnector`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    /// Shared internals.
    inner: Arc<MemoryInner>,
}

impl InMemoryStore {
    /// Creates an empty store with no WAL output and no delay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that appends simulated WAL bytes under `wal_dir`.
    #[must_use]
    pub fn with_wal_dir(wal_dir: impl Into<PathBuf>) -> Self {
        Self::build(Some(wal_dir.into()), None, MemoryState::default())
    }

    /// Returns a store with a per-operation delay that keeps the WAL
    /// setting, injected failures, and scripted healing of `self`.
    ///
    /// Must be called before any connection is opened.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        let state = std::mem::take(&mut *self.lock());
        Self::build(self.inner.wal_dir.clone(), Some(delay), state)
    }

    /// Builds a store around `state`.
    fn build(wal_dir: Option<PathBuf>, delay: Option<Duration>, state: MemoryState) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(state),
                wal_dir,
                delay,
                ..MemoryInner::default()
            }),
        }
    }

    /// Makes every call of `operation` fail with [`StoreError::Rejected`].
    pub fn fail_operation(&self, operation: OperationType) {
        self.lock().failing.insert(operation);
    }

    /// Makes closing `database` fail with [`StoreError::Rejected`]; the
    /// database stays open.
    pub fn fail_close_database(&self, database: &str) {
        self.lock().failing_close.insert(database.to_string());
    }

    /// Scripts the healing snapshots returned for `database`.
    pub fn script_healing(&self, database: &str, snapshots: Vec<HealingStats>) {
        let mut state = self.lock();
        let entry = state.databases.entry(database.to_string()).or_default();
        entry.healing = snapshots.into();
    }

    /// Documents stored in `database`.
    #[must_use]
    pub fn document_count(&self, database: &str) -> usize {
        self.lock().databases.get(database).map_or(0, |db| db.documents.len())
    }

    /// Returns true when `database` is open.
    #[must_use]
    pub fn is_open(&self, database: &str) -> bool {
        self.lock().databases.get(database).is_some_and(|db| db.open)
    }

    /// Connections opened so far.
    #[must_use]
    pub fn opened_connections(&self) -> u64 {
        self.inner.opened.load(Ordering::Relaxed)
    }

    /// Connections closed so far.
    #[must_use]
    pub fn closed_connections(&self) -> u64 {
        self.inner.closed.load(Ordering::Relaxed)
    }

    /// Locks store state.
    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StoreConnector for InMemoryStore {
    async fn connect(&self) -> Result<Arc<dyn StoreConnection>, StoreError> {
        self.inner.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// SECTION: Connection
// ============================================================================

/// Connection to an [`InMemoryStore`].
#[derive(Debug)]
struct MemoryConnection {
    /// Shared internals.
    inner: Arc<MemoryInner>,
    /// Set once the connection is closed.
    closed: AtomicBool,
}

impl MemoryConnection {
    /// Fails when the connection has been closed.
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Connection("connection closed".to_string()));
        }
        Ok(())
    }

    /// Applies delay, closed check, and failure injection for `operation`.
    async fn admit(&self, operation: OperationType) -> Result<(), StoreError> {
        self.ensure_open()?;
        // Every call suspends once, as a networked store would.
        match self.inner.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.failing.contains(&operation) {
            return Err(StoreError::Rejected(format!("{operation} failure injected")));
        }
        Ok(())
    }

    /// Runs `apply` against an open database.
    fn with_database<T>(
        &self,
        handle: &DatabaseHandle,
        apply: impl FnOnce(&mut MemoryDatabase) -> T,
    ) -> Result<T, StoreError> {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.databases.get_mut(&handle.name) {
            Some(database) if database.open && database.id == handle.id => Ok(apply(database)),
            _ => Err(StoreError::NotFound(format!("database {} is not open", handle.name))),
        }
    }

    /// Appends `bytes` simulated WAL bytes for `database`.
    fn append_wal(&self, database: &str, bytes: usize) -> Result<(), StoreError> {
        let Some(root) = &self.inner.wal_dir else {
            return Ok(());
        };
        let dir = root.join(database);
        fs::create_dir_all(&dir).map_err(|err| StoreError::Transport(err.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("p0.wal"))
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        file.write_all(&vec![b'w'; bytes]).map_err(|err| StoreError::Transport(err.to_string()))
    }

    /// Upserts a document and logs the write.
    async fn put(
        &self,
        operation: OperationType,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        self.admit(operation).await?;
        self.with_database(handle, |database| {
            database.documents.insert((collection.to_string(), doc_id.to_string()), payload.to_vec());
        })?;
        self.append_wal(&handle.name, payload.len().saturating_add(doc_id.len()))
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn open_database(&self, name: &str) -> Result<DatabaseHandle, StoreError> {
        self.ensure_open()?;
        let mut guard = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        let database = state.databases.entry(name.to_string()).or_default();
        if !database.open {
            database.open = true;
            database.id = state.next_id;
            state.next_id = state.next_id.saturating_add(1);
        }
        Ok(DatabaseHandle {
            name: name.to_string(),
            id: database.id,
        })
    }

    async fn close_database(&self, handle: &DatabaseHandle) -> Result<(), StoreError> {
        self.ensure_open()?;
        let failing = {
            let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.failing_close.contains(&handle.name)
        };
        if failing {
            return Err(StoreError::Rejected(format!("close of {} failure injected", handle.name)));
        }
        self.with_database(handle, |database| database.open = false)
    }

    async fn create(
        &self,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        self.put(OperationType::Create, handle, collection, doc_id, payload).await
    }

    async fn read(
        &self,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.admit(OperationType::Read).await?;
        self.with_database(handle, |database| {
            database.documents.get(&(collection.to_string(), doc_id.to_string())).cloned()
        })
    }

    async fn update(
        &self,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        self.put(OperationType::Update, handle, collection, doc_id, payload).await
    }

    async fn delete(
        &self,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
    ) -> Result<(), StoreError> {
        self.admit(OperationType::Delete).await?;
        self.with_database(handle, |database| {
            database.documents.remove(&(collection.to_string(), doc_id.to_string()));
        })?;
        self.append_wal(&handle.name, doc_id.len())
    }

    async fn healing_stats(&self, handle: &DatabaseHandle) -> Result<HealingStats, StoreError> {
        self.ensure_open()?;
        self.with_database(handle, |database| {
            if database.healing.len() > 1 {
                database.healing.pop_front().unwrap_or_default()
            } else {
                database.healing.front().copied().unwrap_or_default()
            }
        })
    }

    async fn close(&self) -> Result<(), StoreError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.inner.closed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
