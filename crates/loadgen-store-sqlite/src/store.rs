// crates/loadgen-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Result Store
// Description: Durable matrix result store backed by SQLite.
// Purpose: Persist matrix runs and their per-configuration results.
// Dependencies: rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! Two tables hold matrix output. `runs` has one row per matrix invocation
//! and `results` has one row per configuration, keyed to its run. The
//! "latest run" is the row with the largest `runs.id`. A `store_meta` table
//! records the schema version and opening a store with a different version
//! fails closed.
//!
//! Security posture: database contents are untrusted; loads validate ranges
//! before converting integers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// File name used inside a matrix output directory.
pub const RESULTS_DB_NAME: &str = "results.db";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// WAL journal mode.
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl JournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// Configuration for the result store.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: JournalMode,
}

impl ResultStoreConfig {
    /// Configuration for `path` with default pragmas.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::default(),
        }
    }

    /// Configuration for `results.db` inside a matrix output directory.
    #[must_use]
    pub fn in_output_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(RESULTS_DB_NAME))
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Result store errors.
#[derive(Debug, Error)]
pub enum ResultStoreError {
    /// Store I/O error.
    #[error("result store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("result store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("result store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or arguments.
    #[error("result store invalid data: {0}")]
    Invalid(String),
}

/// Maps an engine error.
#[allow(clippy::needless_pass_by_value, reason = "Used directly in map_err.")]
fn db_error(err: rusqlite::Error) -> ResultStoreError {
    ResultStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// One matrix invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRunRecord {
    /// Store-assigned identifier.
    pub id: i64,
    /// Directory receiving the run's files.
    pub output_dir: String,
    /// Unix milliseconds at start.
    pub started_at: i64,
    /// Unix milliseconds at finish, once finished.
    pub finished_at: Option<i64>,
    /// Configurations planned.
    pub total_tests: u32,
    /// Configurations that succeeded.
    pub success_count: u32,
    /// Configurations that failed.
    pub fail_count: u32,
}

/// One configuration outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Configuration name, such as `3db_5conn_2w`.
    pub config_name: String,
    /// Database count.
    pub databases: u32,
    /// Connections per database.
    pub connections_per_db: u32,
    /// Workers per database.
    pub workers_per_db: u32,
    /// Run length in seconds.
    pub duration_sec: f64,
    /// Operations issued.
    pub total_ops: u64,
    /// Operations per second.
    pub throughput: f64,
    /// Overall 95th percentile latency in milliseconds.
    pub p95_latency_ms: f64,
    /// Overall 99th percentile latency in milliseconds.
    pub p99_latency_ms: f64,
    /// Whether the configuration ran to completion.
    pub success: bool,
    /// Per-configuration result file, if one was written.
    pub result_file: Option<String>,
}

/// A run with its results in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    /// Run row.
    pub run: MatrixRunRecord,
    /// Result rows.
    pub results: Vec<ResultRecord>,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed matrix result store.
#[derive(Clone)]
pub struct SqliteResultStore {
    /// Store configuration.
    config: ResultStoreConfig,
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteResultStore").field("path", &self.config.path).finish_non_exhaustive()
    }
}

impl SqliteResultStore {
    /// Opens or creates a result store.
    ///
    /// # Errors
    ///
    /// Returns [`ResultStoreError`] when the database cannot be opened or
    /// its schema version is unsupported.
    pub fn open(config: ResultStoreConfig) -> Result<Self, ResultStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Opens an existing store without creating one.
    ///
    /// # Errors
    ///
    /// Returns [`ResultStoreError::Io`] when the file is missing.
    pub fn open_existing(config: ResultStoreConfig) -> Result<Self, ResultStoreError> {
        if !config.path.is_file() {
            return Err(ResultStoreError::Io(format!(
                "result store not found: {}",
                config.path.display()
            )));
        }
        Self::open(config)
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Inserts a run row and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ResultStoreError::Db`] when the insert fails.
    pub fn begin_run(
        &self,
        output_dir: &Path,
        started_at: i64,
        total_tests: u32,
    ) -> Result<i64, ResultStoreError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO runs (output_dir, started_at, finished_at, total_tests, \
                 success_count, fail_count) VALUES (?1, ?2, NULL, ?3, 0, 0)",
                params![output_dir.to_string_lossy().into_owned(), started_at, total_tests],
            )
            .map_err(db_error)?;
        Ok(guard.last_insert_rowid())
    }

    /// Inserts a result row for `run_id` and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ResultStoreError::Invalid`] when `total_ops` exceeds the
    /// `SQLite` integer range or the run does not exist.
    pub fn record_result(&self, run_id: i64, result: &ResultRecord) -> Result<i64, ResultStoreError> {
        let total_ops = i64::try_from(result.total_ops)
            .map_err(|_| ResultStoreError::Invalid("total_ops exceeds i64 range".to_string()))?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO results (run_id, config_name, databases, connections_per_db, \
                 workers_per_db, duration_sec, total_ops, throughput, p95_latency_ms, \
                 p99_latency_ms, success, result_file) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    run_id,
                    result.config_name,
                    result.databases,
                    result.connections_per_db,
                    result.workers_per_db,
                    result.duration_sec,
                    total_ops,
                    result.throughput,
                    result.p95_latency_ms,
                    result.p99_latency_ms,
                    result.success,
                    result.result_file,
                ],
            )
            .map_err(|err| match err {
                rusqlite::Error::SqliteFailure(code, _)
                    if code.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    ResultStoreError::Invalid(format!("unknown run id {run_id}"))
                }
                other => db_error(other),
            })?;
        Ok(guard.last_insert_rowid())
    }

    /// Records the end time and outcome counts of a run.
    ///
    /// # Errors
    ///
    /// Returns [`ResultStoreError::Invalid`] when the run does not exist.
    pub fn finish_run(
        &self,
        run_id: i64,
        finished_at: i64,
        success_count: u32,
        fail_count: u32,
    ) -> Result<(), ResultStoreError> {
        let guard = self.lock()?;
        let updated = guard
            .execute(
                "UPDATE runs SET finished_at = ?2, success_count = ?3, fail_count = ?4 \
                 WHERE id = ?1",
                params![run_id, finished_at, success_count, fail_count],
            )
            .map_err(db_error)?;
        if updated == 0 {
            return Err(ResultStoreError::Invalid(format!("unknown run id {run_id}")));
        }
        Ok(())
    }

    /// Loads the run with the largest identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ResultStoreError`] when a query fails or a row is out of
    /// range.
    pub fn latest_run(&self) -> Result<Option<StoredRun>, ResultStoreError> {
        let guard = self.lock()?;
        let latest: Option<i64> = guard
            .query_row("SELECT MAX(id) FROM runs", params![], |row| row.get(0))
            .map_err(db_error)?;
        match latest {
            Some(run_id) => load_run_locked(&guard, run_id),
            None => Ok(None),
        }
    }

    /// Loads one run by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ResultStoreError`] when a query fails or a row is out of
    /// range.
    pub fn load_run(&self, run_id: i64) -> Result<Option<StoredRun>, ResultStoreError> {
        let guard = self.lock()?;
        load_run_locked(&guard, run_id)
    }

    /// Lists every run, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ResultStoreError`] when the query fails.
    pub fn list_runs(&self) -> Result<Vec<MatrixRunRecord>, ResultStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT id, output_dir, started_at, finished_at, total_tests, success_count, \
                 fail_count FROM runs ORDER BY id DESC",
            )
            .map_err(db_error)?;
        let rows = statement.query_map(params![], run_from_row).map_err(db_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_error)
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ResultStoreError> {
        self.connection.lock().map_err(|_| ResultStoreError::Db("mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Loads a run and its results under an already-held lock.
fn load_run_locked(connection: &Connection, run_id: i64) -> Result<Option<StoredRun>, ResultStoreError> {
    let run = connection
        .query_row(
            "SELECT id, output_dir, started_at, finished_at, total_tests, success_count, \
             fail_count FROM runs WHERE id = ?1",
            params![run_id],
            run_from_row,
        )
        .optional()
        .map_err(db_error)?;
    let Some(run) = run else {
        return Ok(None);
    };
    let mut statement = connection
        .prepare(
            "SELECT config_name, databases, connections_per_db, workers_per_db, duration_sec, \
             total_ops, throughput, p95_latency_ms, p99_latency_ms, success, result_file \
             FROM results WHERE run_id = ?1 ORDER BY id",
        )
        .map_err(db_error)?;
    let rows = statement.query_map(params![run_id], result_from_row).map_err(db_error)?;
    let mut results = Vec::new();
    for row in rows {
        let (record, total_ops) = row.map_err(db_error)?;
        let total_ops = u64::try_from(total_ops).map_err(|_| {
            ResultStoreError::Invalid(format!("negative total_ops for {}", record.config_name))
        })?;
        results.push(ResultRecord {
            total_ops,
            ..record
        });
    }
    Ok(Some(StoredRun {
        run,
        results,
    }))
}

/// Maps a `runs` row.
fn run_from_row(row: &Row<'_>) -> rusqlite::Result<MatrixRunRecord> {
    Ok(MatrixRunRecord {
        id: row.get(0)?,
        output_dir: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        total_tests: row.get(4)?,
        success_count: row.get(5)?,
        fail_count: row.get(6)?,
    })
}

/// Maps a `results` row; `total_ops` is returned raw for range checking.
fn result_from_row(row: &Row<'_>) -> rusqlite::Result<(ResultRecord, i64)> {
    let total_ops: i64 = row.get(5)?;
    Ok((
        ResultRecord {
            config_name: row.get(0)?,
            databases: row.get(1)?,
            connections_per_db: row.get(2)?,
            workers_per_db: row.get(3)?,
            duration_sec: row.get(4)?,
            total_ops: 0,
            throughput: row.get(6)?,
            p95_latency_ms: row.get(7)?,
            p99_latency_ms: row.get(8)?,
            success: row.get(9)?,
            result_file: row.get(10)?,
        },
        total_ops,
    ))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates the store path against length limits.
fn validate_store_path(path: &Path) -> Result<(), ResultStoreError> {
    if path.as_os_str().is_empty() {
        return Err(ResultStoreError::Invalid("store path must be non-empty".to_string()));
    }
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ResultStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ResultStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(ResultStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Creates the parent directory of `path` when missing.
fn ensure_parent_dir(path: &Path) -> Result<(), ResultStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| ResultStoreError::Io(err.to_string()))?;
    }
    Ok(())
}

/// Opens an `SQLite` connection.
fn open_connection(config: &ResultStoreConfig) -> Result<Connection, ResultStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies connection pragmas.
fn apply_pragmas(connection: &Connection, config: &ResultStoreConfig) -> Result<(), ResultStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(db_error)?;
    Ok(())
}

/// Initializes the schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), ResultStoreError> {
    let tx = connection.transaction().map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    output_dir TEXT NOT NULL,
                    started_at INTEGER NOT NULL,
                    finished_at INTEGER,
                    total_tests INTEGER NOT NULL,
                    success_count INTEGER NOT NULL,
                    fail_count INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS results (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id INTEGER NOT NULL,
                    config_name TEXT NOT NULL,
                    databases INTEGER NOT NULL,
                    connections_per_db INTEGER NOT NULL,
                    workers_per_db INTEGER NOT NULL,
                    duration_sec REAL NOT NULL,
                    total_ops INTEGER NOT NULL,
                    throughput REAL NOT NULL,
                    p95_latency_ms REAL NOT NULL,
                    p99_latency_ms REAL NOT NULL,
                    success INTEGER NOT NULL,
                    result_file TEXT,
                    FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
                );
                CREATE INDEX IF NOT EXISTS idx_results_run_id ON results (run_id);",
            )
            .map_err(db_error)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(ResultStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}
