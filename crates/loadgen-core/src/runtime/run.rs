// crates/loadgen-core/src/runtime/run.rs
// ============================================================================
// Module: Workload Run
// Description: End-to-end orchestration of one workload run.
// Purpose: Open databases, drive the pool for a duration, and report results.
// Dependencies: crate::{core, interfaces, runtime}, serde_json, tokio, tracing
// ============================================================================

//! ## Overview
//! A [`RunContext`] exclusively owns the database registry and the phase
//! counter for one run; the worker pool borrows both through shared handles.
//! [`run_workload`] walks the run through its steps:
//! 1. Validate settings and open every database.
//! 2. Take the initial healing snapshot and WAL sample.
//! 3. Start the pool and an independent sampler task. The sampler takes WAL
//!    samples and rescales the pool as phases change.
//! 4. Sleep for the run duration, then stop the pool and drain workers.
//! 5. Take final samples, aggregate, and close every database.
//!
//! The run duration is the only cancellation trigger. A call in flight at
//! the deadline may finish after it, up to the drain timeout.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::core::RunClock;
use crate::core::SamplingMode;
use crate::core::ValidationError;
use crate::core::WorkloadProfile;
use crate::core::time::unix_millis;
use crate::interfaces::StoreConnector;
use crate::runtime::database::DatabaseConfig;
use crate::runtime::database::DatabaseError;
use crate::runtime::database::DatabaseManager;
use crate::runtime::database::ManagerSettings;
use crate::runtime::database::PayloadSettings;
use crate::runtime::database::validate_databases;
use crate::runtime::metrics::MultiDbReport;
use crate::runtime::metrics::PercentileAggregation;
use crate::runtime::metrics::PhaseCounter;
use crate::runtime::metrics::collect;
use crate::runtime::pool::PoolError;
use crate::runtime::pool::WorkerPool;
use crate::runtime::pool::WorkerSettings;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Workload run errors.
#[derive(Debug, Error)]
pub enum RunError {
    /// Settings failed validation; nothing was opened.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// Opening or closing a database failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// The worker pool refused to start.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Reading or writing a report failed.
    #[error("run report io error: {0}")]
    Io(String),
    /// Encoding or decoding a report failed.
    #[error("run report serialization error: {0}")]
    Serialization(String),
}

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Everything needed to execute one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Databases under test.
    pub databases: Vec<DatabaseConfig>,
    /// Payload generation.
    pub payload: PayloadSettings,
    /// WAL root; each database samples `{wal_dir}/{name}`.
    pub wal_dir: PathBuf,
    /// Run length.
    pub duration: Duration,
    /// WAL sampling and phase-check interval.
    pub sample_interval: Duration,
    /// Latency accumulator strategy.
    pub sampling: SamplingMode,
    /// Global percentile aggregation.
    pub aggregation: PercentileAggregation,
    /// Optional phased workload.
    pub profile: Option<WorkloadProfile>,
    /// Worker loop settings.
    pub workers: WorkerSettings,
    /// How long stopped workers may take to finish their last call.
    pub drain_timeout: Duration,
}

impl RunSettings {
    /// Settings for `databases` with defaults for everything else.
    #[must_use]
    pub fn new(databases: Vec<DatabaseConfig>, wal_dir: impl Into<PathBuf>, duration: Duration) -> Self {
        Self {
            databases,
            payload: PayloadSettings::default(),
            wal_dir: wal_dir.into(),
            duration,
            sample_interval: Duration::from_secs(1),
            sampling: SamplingMode::Exact,
            aggregation: PercentileAggregation::WeightedAverage,
            profile: None,
            workers: WorkerSettings::default(),
            drain_timeout: Duration::from_secs(5),
        }
    }

    /// Checks every setting before anything is opened.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_databases(&self.databases)?;
        self.payload.validate()?;
        self.sampling.validate()?;
        if self.duration.is_zero() {
            return Err(ValidationError::new("duration", "run duration must be greater than zero"));
        }
        if self.sample_interval.is_zero() {
            return Err(ValidationError::new(
                "sample_interval",
                "sample interval must be greater than zero",
            ));
        }
        if self.workers.doc_count == 0 {
            return Err(ValidationError::new("doc_count", "document count must be greater than zero"));
        }
        if self.workers.collection.trim().is_empty() {
            return Err(ValidationError::new("collection", "collection must be non-empty"));
        }
        if self.workers.operation_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ValidationError::new(
                "operation_timeout",
                "operation timeout must be greater than zero when set",
            ));
        }
        if let Some(mix) = &self.workers.base_mix {
            mix.validate()?;
        }
        if let Some(profile) = &self.profile {
            profile.validate().map_err(|err| err.within("profile"))?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Outcome of one run, written as the per-configuration result file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unix milliseconds at run start.
    pub started_at_unix_ms: i64,
    /// Configured run length in seconds.
    pub duration_secs: f64,
    /// Databases under test.
    pub databases: Vec<DatabaseConfig>,
    /// Largest per-database worker count.
    pub workers_per_db: u32,
    /// Largest per-database connection count.
    pub connections_per_db: u32,
    /// Aggregated measurements.
    pub metrics: MultiDbReport,
}

impl RunReport {
    /// Operations issued across databases.
    #[must_use]
    pub const fn total_operations(&self) -> u64 {
        self.metrics.global.total_operations
    }

    /// Operations per second across databases.
    #[must_use]
    pub const fn throughput(&self) -> f64 {
        self.metrics.global.throughput
    }

    /// Overall 95th percentile latency in milliseconds.
    #[must_use]
    pub fn p95_ms(&self) -> f64 {
        crate::core::time::as_millis_f64(self.metrics.global.overall.p95)
    }

    /// Overall 99th percentile latency in milliseconds.
    #[must_use]
    pub fn p99_ms(&self) -> f64 {
        crate::core::time::as_millis_f64(self.metrics.global.overall.p99)
    }

    /// Writes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Serialization`] or [`RunError::Io`].
    pub fn write_json(&self, path: &Path) -> Result<(), RunError> {
        let bytes =
            serde_json::to_vec_pretty(self).map_err(|err| RunError::Serialization(err.to_string()))?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| RunError::Io(err.to_string()))?;
        }
        fs::write(path, bytes).map_err(|err| RunError::Io(format!("{}: {err}", path.display())))
    }

    /// Reads a report written by [`RunReport::write_json`].
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Io`] or [`RunError::Serialization`].
    pub fn read_json(path: &Path) -> Result<Self, RunError> {
        let bytes = fs::read(path).map_err(|err| RunError::Io(format!("{}: {err}", path.display())))?;
        serde_json::from_slice(&bytes).map_err(|err| RunError::Serialization(err.to_string()))
    }
}

// ============================================================================
// SECTION: Run Context
// ============================================================================

/// Owner of every registry used during one run.
#[derive(Debug)]
pub struct RunContext {
    /// Validated settings.
    settings: RunSettings,
    /// Database registry.
    manager: Arc<DatabaseManager>,
    /// Per-phase operation counts.
    phases: Arc<PhaseCounter>,
    /// Shared profile.
    profile: Option<Arc<WorkloadProfile>>,
}

impl RunContext {
    /// Validates settings and opens every database.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Invalid`] before opening anything, or
    /// [`RunError::Database`] after closing whatever was opened.
    pub async fn open(settings: RunSettings, connector: Arc<dyn StoreConnector>) -> Result<Self, RunError> {
        settings.validate()?;
        let manager = Arc::new(DatabaseManager::new(connector, ManagerSettings {
            wal_root: settings.wal_dir.clone(),
            sampling: settings.sampling,
            payload: settings.payload.clone(),
        }));
        for database in &settings.databases {
            if let Err(err) = manager.add_database(database.clone()).await {
                if let Err(close_err) = manager.close_all().await {
                    warn!(error = %close_err, "cleanup after failed open");
                }
                return Err(err.into());
            }
        }
        Ok(Self {
            profile: settings.profile.clone().map(Arc::new),
            settings,
            manager,
            phases: Arc::new(PhaseCounter::new()),
        })
    }

    /// Database registry for this run.
    #[must_use]
    pub const fn manager(&self) -> &Arc<DatabaseManager> {
        &self.manager
    }

    /// Drives the workload for the configured duration and reports.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Pool`] when the pool cannot start. Sampler and
    /// close failures are logged, not returned.
    pub async fn run(self) -> Result<RunReport, RunError> {
        let started_at_unix_ms = unix_millis();
        if let Err(err) = self.manager.start_healing_all().await {
            warn!(error = %err, "initial healing snapshot failed");
        }
        if let Err(err) = self.manager.sample_wal_all() {
            warn!(error = %err, "initial wal sample failed");
        }

        let clock = RunClock::start();
        let pool = WorkerPool::new(
            Arc::clone(&self.manager),
            self.profile.clone(),
            Arc::clone(&self.phases),
            clock,
            self.settings.workers.clone(),
        );
        if let Err(err) = pool.start() {
            if let Err(close_err) = self.manager.close_all().await {
                warn!(error = %close_err, "cleanup after failed start");
            }
            return Err(err.into());
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let sampler = tokio::spawn(sample_loop(Sampler {
            pool: pool.clone(),
            manager: Arc::clone(&self.manager),
            profile: self.profile.clone(),
            clock,
            interval: self.settings.sample_interval,
            shutdown: shutdown_rx,
        }));

        tokio::time::sleep(self.settings.duration).await;

        if shutdown.send(true).is_err() {
            debug!("sampler exited before shutdown");
        }
        if let Err(err) = sampler.await {
            warn!(error = %err, "sampler task failed");
        }
        let handles = pool.stop();
        drain(handles, self.settings.drain_timeout).await;
        // Operations finishing during the drain are counted, so is their time.
        let measured = clock.elapsed();

        if let Err(err) = self.manager.sample_wal_all() {
            warn!(error = %err, "final wal sample failed");
        }
        if let Err(err) = self.manager.stop_healing_all().await {
            warn!(error = %err, "final healing snapshot failed");
        }
        let metrics = collect(&self.manager, &self.phases, measured, self.settings.aggregation);
        if let Err(err) = self.manager.close_all().await {
            warn!(error = %err, "database close failed");
        }
        info!(
            total_operations = metrics.global.total_operations,
            throughput = metrics.global.throughput,
            errors = metrics.global.total_errors,
            "run complete"
        );

        let databases = self.settings.databases;
        Ok(RunReport {
            started_at_unix_ms,
            duration_secs: self.settings.duration.as_secs_f64(),
            workers_per_db: databases.iter().map(|db| db.workers).max().unwrap_or_default(),
            connections_per_db: databases.iter().map(|db| db.connections).max().unwrap_or_default(),
            databases,
            metrics,
        })
    }
}

/// Validates settings, opens databases, and runs the workload.
///
/// # Errors
///
/// Returns [`RunError`] when validation, opening, or pool start fails.
pub async fn run_workload(
    settings: RunSettings,
    connector: Arc<dyn StoreConnector>,
) -> Result<RunReport, RunError> {
    RunContext::open(settings, connector).await?.run().await
}

// ============================================================================
// SECTION: Background Tasks
// ============================================================================

/// Inputs for the sampler task.
struct Sampler {
    /// Pool to rescale.
    pool: WorkerPool,
    /// Databases to sample.
    manager: Arc<DatabaseManager>,
    /// Profile for phase tracking.
    profile: Option<Arc<WorkloadProfile>>,
    /// Run clock.
    clock: RunClock,
    /// Tick interval.
    interval: Duration,
    /// Shutdown signal.
    shutdown: watch::Receiver<bool>,
}

/// Samples WAL sizes and follows phase changes until shut down.
async fn sample_loop(mut sampler: Sampler) {
    let mut ticker = tokio::time::interval(sampler.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut phase = current_phase_name(&sampler);
    loop {
        tokio::select! {
            changed = sampler.shutdown.changed() => {
                if changed.is_err() || *sampler.shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(err) = sampler.manager.sample_wal_all() {
                    warn!(error = %err, "wal sample failed");
                }
                if sampler.profile.is_none() {
                    continue;
                }
                let now = current_phase_name(&sampler);
                if now != phase {
                    info!(phase = now.as_deref().unwrap_or("none"), "phase changed");
                    phase = now;
                }
                if let Err(err) = sampler.pool.scale_workers() {
                    warn!(error = %err, "worker rescale failed");
                }
            }
        }
    }
}

/// Name of the active phase, if any.
fn current_phase_name(sampler: &Sampler) -> Option<String> {
    sampler
        .profile
        .as_ref()
        .and_then(|profile| profile.current_phase(sampler.clock.elapsed()))
        .map(|phase| phase.name.clone())
}

/// Waits for stopped workers, aborting any still running at the timeout.
async fn drain(handles: Vec<JoinHandle<()>>, timeout: Duration) {
    let started = Instant::now();
    let mut abandoned: usize = 0;
    for handle in handles {
        let remaining = timeout.saturating_sub(started.elapsed());
        let abort = handle.abort_handle();
        match tokio::time::timeout(remaining, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "worker task failed"),
            Err(_) => {
                abort.abort();
                abandoned = abandoned.saturating_add(1);
            }
        }
    }
    if abandoned > 0 {
        warn!(abandoned, "workers still in flight after drain timeout were aborted");
    }
}
