// crates/loadgen-config/src/config.rs
// ============================================================================
// Module: Loadgen Configuration
// Description: Configuration loading and validation for workload runs.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: loadgen-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits
//! and validated eagerly. Every failure is reported as one field path plus a
//! message, and nothing is opened until the whole file validates.
//!
//! The file has six sections: `[run]`, `[store]`, `[[databases]]`, `[crud]`,
//! `[profile]` with `[[profile.phases]]`, and `[matrix]`. Every section is
//! optional; a file that omits `[[databases]]` can still drive a matrix.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use loadgen_core::CrudMix;
use loadgen_core::CrudTransition;
use loadgen_core::DatabaseConfig;
use loadgen_core::MixSpec;
use loadgen_core::PayloadSettings;
use loadgen_core::PercentileAggregation;
use loadgen_core::RunSettings;
use loadgen_core::SamplingMode;
use loadgen_core::ValidationError;
use loadgen_core::WorkerAssignment;
use loadgen_core::WorkerSettings;
use loadgen_core::WorkloadPhase;
use loadgen_core::WorkloadProfile;
use loadgen_core::validate_databases;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "loadgen.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "LOADGEN_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of matrix cells generated from one config.
pub(crate) const MAX_MATRIX_CELLS: usize = 4096;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config {field}: {message}")]
    Invalid {
        /// Offending field path.
        field: String,
        /// Human-readable failure description.
        message: String,
    },
}

impl ConfigError {
    /// Builds an [`ConfigError::Invalid`] for `field`.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<ValidationError> for ConfigError {
    fn from(error: ValidationError) -> Self {
        Self::Invalid {
            field: error.field,
            message: error.message,
        }
    }
}

// ============================================================================
// SECTION: Root
// ============================================================================

/// Complete loadgen configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadgenConfig {
    /// Per-run parameters.
    #[serde(default)]
    pub run: RunConfig,
    /// Store-under-test connection.
    #[serde(default)]
    pub store: StoreConfig,
    /// Databases under test.
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
    /// Default CRUD mix when no database or phase supplies one.
    #[serde(default)]
    pub crud: Option<CrudMix>,
    /// Optional phased workload.
    #[serde(default)]
    pub profile: Option<ProfileConfig>,
    /// Matrix sweep parameters.
    #[serde(default)]
    pub matrix: MatrixConfig,
}

impl LoadgenConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path is `path` when given, else the `LOADGEN_CONFIG` environment
    /// variable, else `loadgen.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", resolved.display())))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::invalid("config", "config file exceeds size limit"));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::invalid("config", "config file must be utf-8"))?;
        Self::parse(content)
    }

    /// Loads configuration like [`LoadgenConfig::load`], but returns the
    /// defaults when no path or environment override is given and
    /// `loadgen.toml` does not exist.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`LoadgenConfig::load`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if path.is_none() && env::var_os(CONFIG_ENV_VAR).is_none() && !Path::new(DEFAULT_CONFIG_NAME).exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// `[[databases]]` may be empty here; [`LoadgenConfig::run_settings`]
    /// requires at least one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run.validate()?;
        self.store.validate()?;
        if let Some(mix) = &self.crud {
            mix.validate()?;
        }
        if !self.databases.is_empty() {
            validate_databases(&self.databases)?;
        }
        self.workload_profile()?;
        self.matrix.validate()?;
        Ok(())
    }

    /// Builds the phased workload, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a phase is malformed or phases
    /// overlap.
    pub fn workload_profile(&self) -> Result<Option<WorkloadProfile>, ConfigError> {
        let Some(profile) = &self.profile else {
            return Ok(None);
        };
        let fallback = self.crud.unwrap_or(CrudMix::DEFAULT);
        let mut phases = Vec::with_capacity(profile.phases.len());
        for (index, phase) in profile.phases.iter().enumerate() {
            phases.push(phase.to_phase(index, fallback)?);
        }
        WorkloadProfile::new(phases)
            .map(Some)
            .map_err(|err| ConfigError::from(err.within("profile")))
    }

    /// Builds validated run settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when no database is configured or any
    /// run setting is out of range.
    pub fn run_settings(&self) -> Result<RunSettings, ConfigError> {
        validate_databases(&self.databases)?;
        let run = &self.run;
        let mut settings = RunSettings::new(
            self.databases.clone(),
            run.wal_dir.clone(),
            Duration::from_secs(run.duration_secs),
        );
        settings.payload = PayloadSettings {
            doc_size: run.doc_size,
            pool_size: run.payload_pool_size,
            seed: run.seed,
        };
        settings.sample_interval = Duration::from_millis(run.sample_interval_ms);
        settings.sampling = run.sampling_mode();
        settings.aggregation = run.aggregation;
        settings.profile = self.workload_profile()?;
        settings.workers = WorkerSettings {
            seed: run.seed,
            per_database_mix: run.per_database_mix,
            base_mix: self.crud,
            assignment: run.worker_assignment,
            collection: run.collection.clone(),
            doc_count: run.doc_count,
            operation_timeout: run.operation_timeout_ms.map(Duration::from_millis),
            ..WorkerSettings::default()
        };
        settings.drain_timeout = Duration::from_millis(run.drain_timeout_ms);
        settings.validate()?;
        Ok(settings)
    }
}

// ============================================================================
// SECTION: Run
// ============================================================================

/// Latency accumulator selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingKind {
    /// Retain every sample.
    #[default]
    Exact,
    /// Retain a bounded reservoir of `reservoir_capacity` samples.
    Reservoir,
    /// Retain a mergeable histogram.
    Histogram,
}

/// `[run]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Run length in seconds.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    /// Seed for workers, payloads, and reservoirs.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Collection every operation targets.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Bytes per generated payload.
    #[serde(default = "default_doc_size")]
    pub doc_size: usize,
    /// Size of the document id space.
    #[serde(default = "default_doc_count")]
    pub doc_count: u64,
    /// Payloads pre-generated per database.
    #[serde(default = "default_payload_pool_size")]
    pub payload_pool_size: usize,
    /// WAL root; each database is sampled at `{wal_dir}/{name}`.
    #[serde(default = "default_wal_dir")]
    pub wal_dir: PathBuf,
    /// WAL sampling and phase-check interval in milliseconds.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// Whether per-database `crud` overrides apply.
    #[serde(default)]
    pub per_database_mix: bool,
    /// How profile-driven workers map to databases.
    #[serde(default)]
    pub worker_assignment: WorkerAssignment,
    /// Latency accumulator.
    #[serde(default)]
    pub sampling: SamplingKind,
    /// Reservoir size when `sampling = "reservoir"`.
    #[serde(default = "default_reservoir_capacity")]
    pub reservoir_capacity: usize,
    /// Cross-database percentile aggregation.
    #[serde(default)]
    pub aggregation: PercentileAggregation,
    /// Optional per-operation deadline in milliseconds.
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
    /// Grace period for workers after stop, in milliseconds.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Optional path for the JSON run report.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            seed: default_seed(),
            collection: default_collection(),
            doc_size: default_doc_size(),
            doc_count: default_doc_count(),
            payload_pool_size: default_payload_pool_size(),
            wal_dir: default_wal_dir(),
            sample_interval_ms: default_sample_interval_ms(),
            per_database_mix: false,
            worker_assignment: WorkerAssignment::default(),
            sampling: SamplingKind::default(),
            reservoir_capacity: default_reservoir_capacity(),
            aggregation: PercentileAggregation::default(),
            operation_timeout_ms: None,
            drain_timeout_ms: default_drain_timeout_ms(),
            output: None,
        }
    }
}

impl RunConfig {
    /// Accumulator mode for this run.
    #[must_use]
    pub const fn sampling_mode(&self) -> SamplingMode {
        match self.sampling {
            SamplingKind::Exact => SamplingMode::Exact,
            SamplingKind::Reservoir => SamplingMode::Reservoir {
                capacity: self.reservoir_capacity,
                seed: self.seed,
            },
            SamplingKind::Histogram => SamplingMode::Histogram,
        }
    }

    /// Validates run parameters.
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("run.duration_secs", self.duration_secs)?;
        require_positive("run.doc_count", self.doc_count)?;
        require_positive("run.sample_interval_ms", self.sample_interval_ms)?;
        if self.doc_size == 0 {
            return Err(ConfigError::invalid("run.doc_size", "must be greater than zero"));
        }
        if self.payload_pool_size == 0 {
            return Err(ConfigError::invalid("run.payload_pool_size", "must be greater than zero"));
        }
        if self.collection.trim().is_empty() {
            return Err(ConfigError::invalid("run.collection", "must be non-empty"));
        }
        if self.sampling == SamplingKind::Reservoir && self.reservoir_capacity == 0 {
            return Err(ConfigError::invalid("run.reservoir_capacity", "must be greater than zero"));
        }
        if let Some(timeout) = self.operation_timeout_ms {
            require_positive("run.operation_timeout_ms", timeout)?;
        }
        validate_path_string("run.wal_dir", &self.wal_dir)?;
        if let Some(output) = &self.output {
            validate_path_string("run.output", output)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// `host:port` of the store under test.
    #[serde(default = "default_store_address")]
    pub address: String,
    /// Connect deadline in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-request deadline in milliseconds; zero disables it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Largest frame accepted from or sent to the store.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: default_store_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl StoreConfig {
    /// Validates connection parameters.
    fn validate(&self) -> Result<(), ConfigError> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(ConfigError::invalid("store.address", "must be non-empty"));
        }
        if !address.contains(':') {
            return Err(ConfigError::invalid("store.address", "must be host:port"));
        }
        require_positive("store.connect_timeout_ms", self.connect_timeout_ms)?;
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::invalid("store.max_frame_bytes", "must be greater than zero"));
        }
        Ok(())
    }

    /// Connect deadline.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-request deadline, if enabled.
    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.request_timeout_ms))
        }
    }
}

// ============================================================================
// SECTION: Profile
// ============================================================================

/// `[profile]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    /// Phases in start order.
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
}

/// One `[[profile.phases]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    /// Phase name used in per-phase counts.
    pub name: String,
    /// Offset from run start in seconds.
    #[serde(default)]
    pub start_secs: u64,
    /// Phase length in seconds.
    pub duration_secs: u64,
    /// Worker count while the phase is current.
    pub workers: u32,
    /// Constant mix for the phase.
    #[serde(default)]
    pub crud: Option<CrudMix>,
    /// Time-varying mix for the phase.
    #[serde(default)]
    pub transition: Option<TransitionConfig>,
    /// Advisory operation rate.
    #[serde(default)]
    pub target_ops_per_sec: Option<f64>,
}

/// Transition between two mixes inside a phase.
///
/// `delay_secs` is measured from the phase start.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionConfig {
    /// Mix before the transition starts.
    pub from: CrudMix,
    /// Mix after the transition ends.
    pub to: CrudMix,
    /// Seconds after the phase start before mixing begins.
    #[serde(default)]
    pub delay_secs: u64,
    /// Seconds over which the mix moves from `from` to `to`.
    pub duration_secs: u64,
}

impl PhaseConfig {
    /// Converts to a core phase, reporting errors under `profile.phases[i]`.
    fn to_phase(&self, index: usize, fallback: CrudMix) -> Result<WorkloadPhase, ConfigError> {
        let field = format!("profile.phases[{index}]");
        let start = Duration::from_secs(self.start_secs);
        let mix = match (&self.crud, &self.transition) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::invalid(field, "set either crud or transition, not both"));
            }
            (Some(mix), None) => MixSpec::Fixed(*mix),
            (None, Some(transition)) => MixSpec::Transition(
                CrudTransition::new(
                    transition.from,
                    transition.to,
                    start.saturating_add(Duration::from_secs(transition.delay_secs)),
                    Duration::from_secs(transition.duration_secs),
                )
                .map_err(|err| err.within(&format!("{field}.transition")))?,
            ),
            (None, None) => MixSpec::Fixed(fallback),
        };
        Ok(WorkloadPhase {
            name: self.name.clone(),
            start,
            duration: Duration::from_secs(self.duration_secs),
            workers: self.workers,
            mix,
            target_ops_per_sec: self.target_ops_per_sec,
        })
    }
}

// ============================================================================
// SECTION: Matrix
// ============================================================================

/// `[matrix]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixConfig {
    /// Database counts to sweep.
    #[serde(default = "default_axis")]
    pub databases: Vec<u32>,
    /// Connections-per-database values to sweep.
    #[serde(default = "default_axis")]
    pub connections: Vec<u32>,
    /// Workers-per-database values to sweep.
    #[serde(default = "default_axis")]
    pub workers: Vec<u32>,
    /// Directory receiving result files, `results.db`, and `summary.md`.
    #[serde(default = "default_matrix_output_dir")]
    pub output_dir: PathBuf,
    /// Run length per configuration in seconds.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    /// Restart the store between configurations.
    #[serde(default)]
    pub restart_server: bool,
    /// Write results to `results.db`.
    #[serde(default = "default_true")]
    pub persist_results: bool,
    /// Write `summary.md`.
    #[serde(default = "default_true")]
    pub write_summary: bool,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            databases: default_axis(),
            connections: default_axis(),
            workers: default_axis(),
            output_dir: default_matrix_output_dir(),
            duration_secs: default_duration_secs(),
            restart_server: false,
            persist_results: true,
            write_summary: true,
        }
    }
}

impl MatrixConfig {
    /// Validates sweep axes and limits.
    fn validate(&self) -> Result<(), ConfigError> {
        let axes = [
            ("matrix.databases", &self.databases),
            ("matrix.connections", &self.connections),
            ("matrix.workers", &self.workers),
        ];
        for (field, values) in axes {
            if values.is_empty() {
                return Err(ConfigError::invalid(field, "must list at least one value"));
            }
            if values.contains(&0) {
                return Err(ConfigError::invalid(field, "values must be greater than zero"));
            }
        }
        let cells = self
            .databases
            .len()
            .saturating_mul(self.connections.len())
            .saturating_mul(self.workers.len());
        if cells > MAX_MATRIX_CELLS {
            return Err(ConfigError::invalid(
                "matrix",
                format!("{cells} configurations exceed the limit of {MAX_MATRIX_CELLS}"),
            ));
        }
        require_positive("matrix.duration_secs", self.duration_secs)?;
        validate_path_string("matrix.output_dir", &self.output_dir)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::invalid("config", "config path exceeds max length"));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::invalid("config", "config path exceeds max length"));
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::invalid("config", "config path component too long"));
        }
    }
    Ok(())
}

/// Validates a configured path against length constraints.
fn validate_path_string(field: &str, value: &Path) -> Result<(), ConfigError> {
    if value.as_os_str().is_empty() {
        return Err(ConfigError::invalid(field, "must be non-empty"));
    }
    if value.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::invalid(field, "exceeds max length"));
    }
    for component in value.components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::invalid(field, "path component too long"));
        }
    }
    Ok(())
}

/// Rejects zero for a numeric field.
fn require_positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default run length.
const fn default_duration_secs() -> u64 {
    60
}

/// Default seed.
const fn default_seed() -> u64 {
    42
}

/// Default collection.
fn default_collection() -> String {
    "loadgen".to_string()
}

/// Default payload size.
const fn default_doc_size() -> usize {
    1_024
}

/// Default document id space.
const fn default_doc_count() -> u64 {
    10_000
}

/// Default payload pool size.
const fn default_payload_pool_size() -> usize {
    100
}

/// Default WAL root.
fn default_wal_dir() -> PathBuf {
    PathBuf::from("data/wal")
}

/// Default sampling interval.
const fn default_sample_interval_ms() -> u64 {
    1_000
}

/// Default reservoir size.
const fn default_reservoir_capacity() -> usize {
    10_000
}

/// Default drain grace period.
const fn default_drain_timeout_ms() -> u64 {
    5_000
}

/// Default store address.
fn default_store_address() -> String {
    "127.0.0.1:7070".to_string()
}

/// Default connect deadline.
const fn default_connect_timeout_ms() -> u64 {
    5_000
}

/// Default request deadline.
const fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Default frame size limit.
const fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

/// Default sweep axis.
fn default_axis() -> Vec<u32> {
    vec![1]
}

/// Default matrix output directory.
fn default_matrix_output_dir() -> PathBuf {
    PathBuf::from("matrix-results")
}

/// Serde helper for boolean fields that default on.
const fn default_true() -> bool {
    true
}
