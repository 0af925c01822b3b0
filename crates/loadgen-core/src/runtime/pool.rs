// crates/loadgen-core/src/runtime/pool.rs
// ============================================================================
// Module: Worker Pool
// Description: Worker allocation across databases and the per-worker loop.
// Purpose: Drive concurrent CRUD traffic that follows the active workload phase.
// Dependencies: crate::{core, interfaces, runtime}, rand, tokio, tracing
// ============================================================================

//! ## Overview
//! A [`WorkerPool`] moves through `stopped -> allocated -> running -> stopped`.
//! [`WorkerPool::allocate`] plans the worker set, [`WorkerPool::start`]
//! launches one tokio task per planned worker, and [`WorkerPool::stop`]
//! signals every worker and hands back their join handles.
//!
//! Worker counts come from the active profile phase or, without a profile,
//! from the sum of per-database worker counts. [`WorkerPool::scale_workers`]
//! recomputes that count; when it differs the whole worker set is replaced
//! under the registry lock. Replaced workers finish their in-flight call and
//! exit; their calls are not drained.
//!
//! Stopping is cooperative: a worker checks its stop flag before each
//! operation and never cancels a call already in flight.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;

use crate::core::CrudMix;
use crate::core::MIX_TOTAL;
use crate::core::OperationType;
use crate::core::RunClock;
use crate::core::WorkloadProfile;
use crate::interfaces::StoreError;
use crate::runtime::database::DatabaseContext;
use crate::runtime::database::DatabaseManager;
use crate::runtime::metrics::PhaseCounter;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Worker pool errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool is not in the state the call requires.
    #[error("worker pool is {actual}, expected {expected}")]
    InvalidState {
        /// State the call requires.
        expected: PoolStatus,
        /// Current state.
        actual: PoolStatus,
    },
    /// No database is registered to assign workers to.
    #[error("no databases registered")]
    NoDatabases,
}

// ============================================================================
// SECTION: Settings
// ============================================================================

/// How profile-driven workers are assigned to databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerAssignment {
    /// Worker `k` is pinned to database `k mod D`.
    #[default]
    Pinned,
    /// Every worker picks uniformly among all databases per operation.
    Shared,
}

/// Settings that shape every worker's loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Global seed; worker `id` uses `seed + id`.
    pub seed: u64,
    /// Honor per-database mix overrides.
    pub per_database_mix: bool,
    /// Mix used when no override or profile mix applies.
    pub base_mix: Option<CrudMix>,
    /// Database assignment for profile-driven pools.
    pub assignment: WorkerAssignment,
    /// Collection every operation targets.
    pub collection: String,
    /// Document ids are drawn from `0 .. doc_count`.
    pub doc_count: u64,
    /// Sleep when no assigned database is available, or after an operation
    /// fails because the connection itself is down.
    pub idle_backoff: Duration,
    /// Optional per-operation deadline.
    pub operation_timeout: Option<Duration>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            per_database_mix: false,
            base_mix: None,
            assignment: WorkerAssignment::Pinned,
            collection: "loadgen".to_string(),
            doc_count: 10_000,
            idle_backoff: Duration::from_millis(10),
            operation_timeout: None,
        }
    }
}

// ============================================================================
// SECTION: Status
// ============================================================================

/// Pool lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// No workers exist.
    Stopped,
    /// Workers are planned but not launched.
    Allocated,
    /// Worker tasks are running.
    Running,
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Allocated => "allocated",
            Self::Running => "running",
        })
    }
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    /// Worker identifier, unique over the pool's lifetime.
    pub id: u64,
    /// Databases the worker may target.
    pub databases: Vec<String>,
    /// Connection slot; wraps over each database's connection pool.
    pub connection_slot: usize,
    /// Operations issued by this worker.
    pub operations: u64,
}

/// Result of [`WorkerPool::scale_workers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleOutcome {
    /// Worker count before the call.
    pub previous: usize,
    /// Worker count after the call.
    pub current: usize,
}

impl ScaleOutcome {
    /// Returns true when the worker set was replaced.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.previous != self.current
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// One registered worker.
struct WorkerSlot {
    /// Worker identifier.
    id: u64,
    /// Databases the worker may target.
    databases: Arc<[String]>,
    /// Connection slot.
    connection_slot: usize,
    /// Per-worker operation counter.
    operations: Arc<AtomicU64>,
    /// Cooperative stop flag.
    stop: Arc<AtomicBool>,
    /// Task handle once launched.
    handle: Option<JoinHandle<()>>,
}

/// Worker registry guarded by the pool's coordinating lock.
struct Registry {
    /// Lifecycle state.
    status: PoolStatus,
    /// Current worker set.
    workers: Vec<WorkerSlot>,
    /// Handles of workers replaced by a rescale, returned by `stop`.
    retired: Vec<JoinHandle<()>>,
    /// Next worker identifier.
    next_id: u64,
}

/// A planned worker before identifiers are assigned.
struct PlannedWorker {
    /// Databases the worker may target.
    databases: Arc<[String]>,
    /// Connection slot.
    connection_slot: usize,
}

/// State shared by the pool handle and every worker task.
struct PoolShared {
    /// Database registry owned by the run.
    databases: Arc<DatabaseManager>,
    /// Optional workload profile.
    profile: Option<Arc<WorkloadProfile>>,
    /// Per-phase operation counts.
    phases: Arc<PhaseCounter>,
    /// Run clock used for phase lookup.
    clock: RunClock,
    /// Worker loop settings.
    settings: WorkerSettings,
    /// Operations issued across all workers.
    total_operations: AtomicU64,
    /// Coordinating lock for the worker registry.
    registry: Mutex<Registry>,
}

// ============================================================================
// SECTION: Pool
// ============================================================================

/// Cloneable handle to a worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    /// Shared pool state.
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("status", &self.status())
            .field("workers", &self.worker_count())
            .field("total_operations", &self.total_operations())
            .finish()
    }
}

impl WorkerPool {
    /// Creates a stopped pool.
    #[must_use]
    pub fn new(
        databases: Arc<DatabaseManager>,
        profile: Option<Arc<WorkloadProfile>>,
        phases: Arc<PhaseCounter>,
        clock: RunClock,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                databases,
                profile,
                phases,
                clock,
                settings,
                total_operations: AtomicU64::new(0),
                registry: Mutex::new(Registry {
                    status: PoolStatus::Stopped,
                    workers: Vec::new(),
                    retired: Vec::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.lock_registry().status
    }

    /// Number of registered workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.lock_registry().workers.len()
    }

    /// Operations issued across all workers since the pool was created.
    #[must_use]
    pub fn total_operations(&self) -> u64 {
        self.shared.total_operations.load(Ordering::Relaxed)
    }

    /// Snapshot of every registered worker.
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        self.lock_registry()
            .workers
            .iter()
            .map(|slot| WorkerSnapshot {
                id: slot.id,
                databases: slot.databases.to_vec(),
                connection_slot: slot.connection_slot,
                operations: slot.operations.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Worker count required right now.
    ///
    /// With a profile this is the active phase's count, or zero before the
    /// first phase. Without one it is the sum of per-database worker counts.
    #[must_use]
    pub fn desired_workers(&self) -> usize {
        if let Some(profile) = &self.shared.profile {
            let count = profile.current_worker_count(self.shared.clock.elapsed()).unwrap_or(0);
            return usize::try_from(count).unwrap_or(usize::MAX);
        }
        self.shared
            .databases
            .contexts()
            .iter()
            .map(|context| usize::try_from(context.config().workers).unwrap_or(0))
            .fold(0, usize::saturating_add)
    }

    /// Plans the worker set without launching it.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidState`] unless the pool is stopped, and
    /// [`PoolError::NoDatabases`] when nothing is registered.
    pub fn allocate(&self) -> Result<usize, PoolError> {
        let planned = self.plan()?;
        let mut registry = self.lock_registry();
        if registry.status != PoolStatus::Stopped {
            return Err(PoolError::InvalidState {
                expected: PoolStatus::Stopped,
                actual: registry.status,
            });
        }
        register(&mut registry, planned);
        registry.status = PoolStatus::Allocated;
        Ok(registry.workers.len())
    }

    /// Launches every planned worker, allocating first when stopped.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidState`] when already running, and
    /// [`PoolError::NoDatabases`] when nothing is registered.
    pub fn start(&self) -> Result<usize, PoolError> {
        if self.status() == PoolStatus::Stopped {
            self.allocate()?;
        }
        let mut registry = self.lock_registry();
        if registry.status != PoolStatus::Allocated {
            return Err(PoolError::InvalidState {
                expected: PoolStatus::Allocated,
                actual: registry.status,
            });
        }
        for slot in &mut registry.workers {
            self.launch(slot);
        }
        registry.status = PoolStatus::Running;
        let workers = registry.workers.len();
        drop(registry);
        info!(workers, "worker pool started");
        Ok(workers)
    }

    /// Replaces the worker set when the desired count has changed.
    ///
    /// The new set is planned before anything is stopped, so a planning
    /// failure leaves the running pool untouched.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidState`] unless the pool is running, and
    /// [`PoolError::NoDatabases`] when nothing is registered.
    pub fn scale_workers(&self) -> Result<ScaleOutcome, PoolError> {
        let planned = self.plan()?;
        let mut registry = self.lock_registry();
        if registry.status != PoolStatus::Running {
            return Err(PoolError::InvalidState {
                expected: PoolStatus::Running,
                actual: registry.status,
            });
        }
        let previous = registry.workers.len();
        if planned.len() == previous {
            return Ok(ScaleOutcome {
                previous,
                current: previous,
            });
        }
        let old = std::mem::take(&mut registry.workers);
        for slot in old {
            slot.stop.store(true, Ordering::Release);
            if let Some(handle) = slot.handle {
                registry.retired.push(handle);
            }
        }
        register(&mut registry, planned);
        for slot in &mut registry.workers {
            self.launch(slot);
        }
        let current = registry.workers.len();
        drop(registry);
        info!(previous, current, "worker pool rescaled");
        Ok(ScaleOutcome {
            previous,
            current,
        })
    }

    /// Signals every worker to stop and empties the registry.
    ///
    /// Returns the join handles of current and previously replaced workers.
    /// Calling this on a stopped pool returns no handles.
    pub fn stop(&self) -> Vec<JoinHandle<()>> {
        let mut registry = self.lock_registry();
        let mut handles = std::mem::take(&mut registry.retired);
        let workers = std::mem::take(&mut registry.workers);
        let was = registry.status;
        registry.status = PoolStatus::Stopped;
        drop(registry);
        let count = workers.len();
        for slot in workers {
            slot.stop.store(true, Ordering::Release);
            if let Some(handle) = slot.handle {
                handles.push(handle);
            }
        }
        if was != PoolStatus::Stopped {
            info!(workers = count, total_operations = self.total_operations(), "worker pool stopped");
        }
        handles
    }

    /// Locks the registry, recovering from poisoning.
    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.shared.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plans the desired worker set against the current database registry.
    fn plan(&self) -> Result<Vec<PlannedWorker>, PoolError> {
        let contexts = self.shared.databases.contexts();
        if contexts.is_empty() {
            return Err(PoolError::NoDatabases);
        }
        let Some(profile) = &self.shared.profile else {
            return Ok(plan_per_database(&contexts));
        };
        let count = profile.current_worker_count(self.shared.clock.elapsed()).unwrap_or(0);
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        Ok(match self.shared.settings.assignment {
            WorkerAssignment::Pinned => plan_pinned(&contexts, count),
            WorkerAssignment::Shared => plan_shared(&contexts, count),
        })
    }

    /// Spawns the task for one registered slot.
    fn launch(&self, slot: &mut WorkerSlot) {
        let worker = Worker {
            id: slot.id,
            databases: Arc::clone(&slot.databases),
            connection_slot: slot.connection_slot,
            rng: StdRng::seed_from_u64(self.shared.settings.seed.wrapping_add(slot.id)),
            operations: Arc::clone(&slot.operations),
            stop: Arc::clone(&slot.stop),
            shared: Arc::clone(&self.shared),
        };
        slot.handle = Some(tokio::spawn(worker.run()));
    }
}

/// Adds planned workers to the registry with fresh identifiers.
fn register(registry: &mut Registry, planned: Vec<PlannedWorker>) {
    for worker in planned {
        let id = registry.next_id;
        registry.next_id = registry.next_id.saturating_add(1);
        registry.workers.push(WorkerSlot {
            id,
            databases: worker.databases,
            connection_slot: worker.connection_slot,
            operations: Arc::new(AtomicU64::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        });
    }
}

/// Each database's configured worker count, pinned, connections round-robin.
fn plan_per_database(contexts: &[Arc<DatabaseContext>]) -> Vec<PlannedWorker> {
    let mut planned = Vec::new();
    for context in contexts {
        let databases: Arc<[String]> = Arc::from(vec![context.name().to_string()]);
        let workers = usize::try_from(context.config().workers).unwrap_or(0);
        for index in 0 .. workers {
            planned.push(PlannedWorker {
                databases: Arc::clone(&databases),
                connection_slot: index,
            });
        }
    }
    planned
}

/// Worker `k` pinned to database `k mod D`, connections round-robin per database.
fn plan_pinned(contexts: &[Arc<DatabaseContext>], count: usize) -> Vec<PlannedWorker> {
    let names: Vec<Arc<[String]>> =
        contexts.iter().map(|context| Arc::from(vec![context.name().to_string()])).collect();
    let mut per_database = vec![0usize; names.len()];
    let mut planned = Vec::with_capacity(count);
    for index in 0 .. count {
        let database = index % names.len();
        let (Some(databases), Some(next_slot)) = (names.get(database), per_database.get_mut(database))
        else {
            continue;
        };
        planned.push(PlannedWorker {
            databases: Arc::clone(databases),
            connection_slot: *next_slot,
        });
        *next_slot = next_slot.saturating_add(1);
    }
    planned
}

/// Every worker may target every database.
fn plan_shared(contexts: &[Arc<DatabaseContext>], count: usize) -> Vec<PlannedWorker> {
    let databases: Arc<[String]> =
        contexts.iter().map(|context| context.name().to_string()).collect::<Vec<_>>().into();
    (0 .. count)
        .map(|index| PlannedWorker {
            databases: Arc::clone(&databases),
            connection_slot: index,
        })
        .collect()
}

// ============================================================================
// SECTION: Worker Loop
// ============================================================================

/// State owned by one running worker task.
struct Worker {
    /// Worker identifier.
    id: u64,
    /// Databases the worker may target.
    databases: Arc<[String]>,
    /// Connection slot.
    connection_slot: usize,
    /// Deterministic generator seeded from the global seed and worker id.
    rng: StdRng,
    /// Per-worker operation counter.
    operations: Arc<AtomicU64>,
    /// Cooperative stop flag.
    stop: Arc<AtomicBool>,
    /// Pool state.
    shared: Arc<PoolShared>,
}

impl Worker {
    /// Issues operations until signaled to stop.
    async fn run(mut self) {
        debug!(worker_id = self.id, databases = self.databases.len(), "worker started");
        while !self.stop.load(Ordering::Acquire) {
            let Some(context) = self.pick_database() else {
                tokio::time::sleep(self.shared.settings.idle_backoff).await;
                continue;
            };
            self.issue(&context).await;
        }
        debug!(
            worker_id = self.id,
            operations = self.operations.load(Ordering::Relaxed),
            "worker stopped"
        );
    }

    /// Picks a database: the pinned one, or uniformly among the assigned set.
    fn pick_database(&mut self) -> Option<Arc<DatabaseContext>> {
        let name = match self.databases.len() {
            0 => return None,
            1 => self.databases.first()?,
            len => self.databases.get(self.rng.gen_range(0 .. len))?,
        };
        self.shared.databases.get(name)
    }

    /// Mix in effect for `context` at `elapsed`.
    fn effective_mix(&self, context: &DatabaseContext, elapsed: Duration) -> CrudMix {
        let settings = &self.shared.settings;
        if settings.per_database_mix
            && let Some(mix) = context.config().crud
        {
            return mix;
        }
        if let Some(mix) = self.shared.profile.as_ref().and_then(|profile| profile.current_mix(elapsed)) {
            return mix;
        }
        settings.base_mix.unwrap_or(CrudMix::DEFAULT)
    }

    /// Issues, times, and records one operation.
    async fn issue(&mut self, context: &DatabaseContext) {
        let elapsed = self.shared.clock.elapsed();
        let mix = self.effective_mix(context, elapsed);
        let operation = mix.select(self.rng.gen_range(0 .. MIX_TOTAL));
        let doc_id = format!("doc-{}", self.rng.gen_range(0 .. self.shared.settings.doc_count.max(1)));
        let payload_index = self.rng.gen_range(0 .. context.payload_count().max(1));

        let started = Instant::now();
        let result = self.execute(context, operation, &doc_id, payload_index).await;
        let latency = started.elapsed();

        context.latency().record(operation, latency);
        let mut channel_down = false;
        if let Err(err) = result {
            context.latency().record_error(operation);
            channel_down = err.is_channel_failure();
            debug!(
                worker_id = self.id,
                database = %context.name(),
                operation = %operation,
                error = %err,
                "operation failed"
            );
        }
        if let Some(phase) =
            self.shared.profile.as_ref().and_then(|profile| profile.current_phase(elapsed))
        {
            self.shared.phases.increment(&phase.name);
        }
        self.operations.fetch_add(1, Ordering::Relaxed);
        self.shared.total_operations.fetch_add(1, Ordering::Relaxed);
        if channel_down {
            tokio::time::sleep(self.shared.settings.idle_backoff).await;
        }
    }

    /// Runs the store call, applying the optional deadline.
    async fn execute(
        &self,
        context: &DatabaseContext,
        operation: OperationType,
        doc_id: &str,
        payload_index: usize,
    ) -> Result<(), StoreError> {
        let connection = context.connection(self.connection_slot);
        let handle = context.handle();
        let collection = self.shared.settings.collection.as_str();
        let payload = context.payload(payload_index);
        let call = async {
            match operation {
                OperationType::Create => connection.create(handle, collection, doc_id, payload).await,
                OperationType::Read => connection.read(handle, collection, doc_id).await.map(|_| ()),
                OperationType::Update => connection.update(handle, collection, doc_id, payload).await,
                OperationType::Delete => connection.delete(handle, collection, doc_id).await,
            }
        };
        match self.shared.settings.operation_timeout {
            Some(deadline) => tokio::time::timeout(deadline, call).await.map_err(|_| {
                StoreError::Timeout(format!("{operation} exceeded {}ms", deadline.as_millis()))
            })?,
            None => call.await,
        }
    }
}
