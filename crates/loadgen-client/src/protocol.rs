// crates/loadgen-client/src/protocol.rs
// ============================================================================
// Module: Wire Protocol
// Description: Request and response envelopes for the store wire protocol.
// Purpose: Encode store calls as JSON frames and decode replies.
// Dependencies: base64, serde, serde_json
// ============================================================================

//! ## Overview
//! Each request carries a client-assigned `id`, a `method` name, and a JSON
//! `params` object. Each response echoes the `id` and carries either a
//! `result` value or an `error` object with a `code` and `message`. Document
//! payloads travel as standard base64 strings.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use loadgen_core::StoreError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ClientError;

// ============================================================================
// SECTION: Methods
// ============================================================================

/// Store methods understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Open a database by name.
    OpenDatabase,
    /// Close an opened database.
    CloseDatabase,
    /// Insert a document.
    Create,
    /// Fetch a document.
    Read,
    /// Replace a document.
    Update,
    /// Remove a document.
    Delete,
    /// Fetch healing counters.
    HealingStats,
}

impl Method {
    /// Wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenDatabase => "open_database",
            Self::CloseDatabase => "close_database",
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::HealingStats => "healing_stats",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Envelopes
// ============================================================================

/// Request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation identifier.
    pub id: u64,
    /// Method to invoke.
    pub method: Method,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// Error object returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Error code the server uses for missing databases or documents.
pub const NOT_FOUND_CODE: &str = "not_found";

impl From<WireError> for StoreError {
    fn from(error: WireError) -> Self {
        if error.code == NOT_FOUND_CODE {
            Self::NotFound(error.message)
        } else {
            Self::Rejected(format!("{}: {}", error.code, error.message))
        }
    }
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Identifier of the request being answered.
    pub id: u64,
    /// Result value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    /// Converts the envelope into its result value.
    ///
    /// A response with neither field set yields [`Value::Null`].
    ///
    /// # Errors
    ///
    /// Returns the server error mapped to a [`StoreError`].
    pub fn into_result(self) -> Result<Value, StoreError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error.into()),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

// ============================================================================
// SECTION: Codec
// ============================================================================

/// Serializes a request into frame bytes.
///
/// # Errors
///
/// Returns [`ClientError::Codec`] when serialization fails.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, ClientError> {
    serde_json::to_vec(request).map_err(|err| ClientError::Codec(err.to_string()))
}

/// Parses frame bytes into a response.
///
/// # Errors
///
/// Returns [`ClientError::Codec`] when the bytes are not a response envelope.
pub fn decode_response(bytes: &[u8]) -> Result<Response, ClientError> {
    serde_json::from_slice(bytes).map_err(|err| ClientError::Codec(err.to_string()))
}

/// Encodes a document payload for transport.
#[must_use]
pub fn encode_payload(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

/// Decodes a transported document payload.
///
/// # Errors
///
/// Returns [`StoreError::Protocol`] when the text is not valid base64.
pub fn decode_payload(text: &str) -> Result<Vec<u8>, StoreError> {
    STANDARD.decode(text).map_err(|err| StoreError::Protocol(format!("invalid payload: {err}")))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
