// crates/loadgen-config/src/lib.rs
// ============================================================================
// Module: Loadgen Config Library
// Description: Canonical config model and validation for loadgen.
// Purpose: Single source of truth for loadgen.toml semantics.
// Dependencies: loadgen-core, serde, toml
// ============================================================================

//! ## Overview
//! `loadgen-config` defines the configuration model for workload runs and
//! matrix sweeps. It validates eagerly and fails closed, and it converts a
//! validated file into the core run settings.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod overrides;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use overrides::RunOverrides;
