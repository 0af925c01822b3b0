// crates/loadgen-client/src/lib.rs
// ============================================================================
// Module: Loadgen Client Library
// Description: Client for a store under test reached over a framed channel.
// Purpose: Provide store connections for workload runs against a live store.
// Dependencies: loadgen-core, base64, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! The client speaks a request/response protocol over a stream framed with a
//! 4-byte little-endian length prefix. Payloads are JSON envelopes correlated
//! by a per-connection request identifier.
//!
//! Security posture: the server is untrusted; frame sizes are bounded and
//! malformed replies fail closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod client;
pub mod frame;
pub mod protocol;

// ============================================================================
// SECTION: Imports
// ============================================================================

use loadgen_core::StoreError;
use thiserror::Error;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use client::ClientSettings;
pub use client::FramedConnection;
pub use client::StreamOpener;
pub use client::TcpStoreConnector;
pub use frame::MAX_FRAME_BYTES;
pub use frame::read_frame;
pub use frame::write_frame;
pub use protocol::Method;
pub use protocol::Request;
pub use protocol::Response;
pub use protocol::WireError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Channel-level client errors.
///
/// # Invariants
/// - Variants are stable for store error mapping and tests.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Reading or writing the stream failed.
    #[error("store channel io error: {0}")]
    Io(String),
    /// The peer closed the stream.
    #[error("store channel closed by peer")]
    Closed,
    /// The connection was already closed or broken.
    #[error("store connection is not open")]
    Disconnected,
    /// A frame exceeded the size limit.
    #[error("store frame exceeds size limit ({actual} > {limit})")]
    FrameTooLarge {
        /// Actual size in bytes.
        actual: usize,
        /// Maximum size in bytes.
        limit: usize,
    },
    /// JSON encoding or decoding failed.
    #[error("store codec error: {0}")]
    Codec(String),
    /// The reply violated the protocol.
    #[error("store protocol error: {0}")]
    Protocol(String),
    /// The exchange did not finish in time.
    #[error("store request timed out after {0} ms")]
    Timeout(u64),
}

impl From<ClientError> for StoreError {
    fn from(error: ClientError) -> Self {
        let message = error.to_string();
        match error {
            ClientError::Io(_) => Self::Transport(message),
            ClientError::Closed | ClientError::Disconnected => Self::Connection(message),
            ClientError::FrameTooLarge { .. } | ClientError::Codec(_) | ClientError::Protocol(_) => {
                Self::Protocol(message)
            }
            ClientError::Timeout(_) => Self::Timeout(message),
        }
    }
}
