// crates/loadgen-core/src/interfaces/mod.rs
// ============================================================================
// Module: Store Interfaces
// Description: Backend-agnostic contract for the store under test.
// Purpose: Let the worker pool drive any store through one connection trait.
// Dependencies: async-trait, crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! The engine never links the store under test directly. It reaches it
//! through a [`StoreConnector`] that opens [`StoreConnection`]s. Each
//! connection carries one in-flight request at a time; workers share a
//! connection only when they are assigned the same connection slot.
//!
//! Implementations: the framed TCP client in `loadgen-client` and
//! [`crate::runtime::InMemoryStore`] for tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::healing::HealingStats;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned by the store under test or the channel reaching it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connecting to the store failed.
    #[error("store connection error: {0}")]
    Connection(String),
    /// Reading or writing the channel failed.
    #[error("store transport error: {0}")]
    Transport(String),
    /// The store replied with a malformed or mismatched frame.
    #[error("store protocol error: {0}")]
    Protocol(String),
    /// The requested database or document does not exist.
    #[error("store not found: {0}")]
    NotFound(String),
    /// The store refused the request.
    #[error("store rejected request: {0}")]
    Rejected(String),
    /// The operation exceeded its deadline.
    #[error("store operation timed out: {0}")]
    Timeout(String),
}

impl StoreError {
    /// Returns true when the connection, not the request, failed.
    #[must_use]
    pub const fn is_channel_failure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Transport(_))
    }
}

// ============================================================================
// SECTION: Handles
// ============================================================================

/// Handle for an opened database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseHandle {
    /// Logical database name.
    pub name: String,
    /// Store-assigned identifier.
    pub id: u64,
}

// ============================================================================
// SECTION: Connection
// ============================================================================

/// One connection to the store under test.
///
/// # Invariants
/// - Calls on the same connection are serialized by the implementation.
/// - `read` returns `Ok(None)` for a missing document rather than an error.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Opens (or creates) a database by name.
    async fn open_database(&self, name: &str) -> Result<DatabaseHandle, StoreError>;

    /// Closes a previously opened database.
    async fn close_database(&self, handle: &DatabaseHandle) -> Result<(), StoreError>;

    /// Inserts a document.
    async fn create(
        &self,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
        payload: &[u8],
    ) -> Result<(), StoreError>;

    /// Fetches a document.
    async fn read(
        &self,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Overwrites a document.
    async fn update(
        &self,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
        payload: &[u8],
    ) -> Result<(), StoreError>;

    /// Removes a document.
    async fn delete(
        &self,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
    ) -> Result<(), StoreError>;

    /// Fetches cumulative healing counters for a database.
    async fn healing_stats(&self, handle: &DatabaseHandle) -> Result<HealingStats, StoreError>;

    /// Releases the connection.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Opens connections to the store under test.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Opens a fresh connection.
    async fn connect(&self) -> Result<Arc<dyn StoreConnection>, StoreError>;
}
