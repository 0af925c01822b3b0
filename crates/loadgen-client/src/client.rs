// crates/loadgen-client/src/client.rs
// ============================================================================
// Module: Framed Store Client
// Description: Store connection over a length-prefixed request channel.
// Purpose: Implement the store interfaces against a remote store process.
// Dependencies: loadgen-core, async-trait, serde_json, tokio, tracing
// ============================================================================

//! ## Overview
//! [`FramedConnection`] serializes one request/response exchange at a time
//! over any async byte stream. Request identifiers increase monotonically
//! per connection and every response must echo the identifier it answers.
//! The stream is moved out of the channel for the length of an exchange and
//! put back only after the matching reply is decoded, so a failed or
//! cancelled exchange never leaves a half-read reply on a live stream.
//! A dropped stream is re-opened through the connection's [`StreamOpener`]
//! on the next call; without one, later calls fail with
//! [`StoreError::Connection`]. [`TcpStoreConnector`] opens such connections
//! over TCP and re-opens them the same way.
//!
//! Security posture: server replies are untrusted; frame sizes are bounded
//! and malformed replies fail closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loadgen_core::DatabaseHandle;
use loadgen_core::HealingStats;
use loadgen_core::StoreConnection;
use loadgen_core::StoreConnector;
use loadgen_core::StoreError;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::warn;

use crate::ClientError;
use crate::frame::MAX_FRAME_BYTES;
use crate::frame::read_frame;
use crate::frame::write_frame;
use crate::protocol::Method;
use crate::protocol::Request;
use crate::protocol::Response;
use crate::protocol::decode_payload;
use crate::protocol::decode_response;
use crate::protocol::encode_payload;
use crate::protocol::encode_request;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Connection settings shared by every connection a connector opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Deadline for establishing a connection.
    pub connect_timeout: Duration,
    /// Deadline for one request/response exchange, if any.
    pub request_timeout: Option<Duration>,
    /// Largest frame accepted or sent.
    pub max_frame_bytes: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Some(Duration::from_secs(30)),
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

// ============================================================================
// SECTION: Replies
// ============================================================================

/// Result of `open_database`.
#[derive(Debug, Deserialize)]
struct OpenReply {
    /// Store-assigned database identifier.
    id: u64,
}

/// Result of `read`.
#[derive(Debug, Deserialize)]
struct ReadReply {
    /// Base64 payload, absent when the document does not exist.
    #[serde(default)]
    payload: Option<String>,
}

/// Parses a result value into a typed reply.
fn parse_reply<T: DeserializeOwned>(method: Method, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value)
        .map_err(|err| StoreError::Protocol(format!("invalid {method} reply: {err}")))
}

/// Parameters naming a database handle.
fn handle_params(handle: &DatabaseHandle) -> Value {
    json!({
        "database": handle.name,
        "db_id": handle.id,
    })
}

/// Parameters naming a document, with an optional payload.
fn document_params(
    handle: &DatabaseHandle,
    collection: &str,
    doc_id: &str,
    payload: Option<&[u8]>,
) -> Value {
    let mut params = json!({
        "database": handle.name,
        "db_id": handle.id,
        "collection": collection,
        "doc_id": doc_id,
    });
    if let (Some(payload), Some(map)) = (payload, params.as_object_mut()) {
        map.insert("payload".to_string(), Value::String(encode_payload(payload)));
    }
    params
}

// ============================================================================
// SECTION: Connection
// ============================================================================

/// Opens a fresh stream to replace one that broke.
#[async_trait]
pub trait StreamOpener<S>: Debug + Send + Sync {
    /// Establishes a new stream to the store.
    async fn open(&self) -> Result<S, StoreError>;
}

/// Stream plus correlation state, guarded together.
#[derive(Debug)]
struct Channel<S> {
    /// Live stream; `None` while broken, mid-exchange, or closed.
    stream: Option<S>,
    /// Set by `close`; a closed channel is never re-opened.
    closed: bool,
    /// Identifier for the next request.
    next_id: u64,
}

impl<S> Channel<S> {
    /// Reserves the next request identifier.
    fn reserve_id(&mut self) -> Result<u64, ClientError> {
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| ClientError::Protocol("request id overflow".to_string()))?;
        Ok(id)
    }
}

/// Store connection over a length-prefixed framed stream.
///
/// # Invariants
/// - At most one exchange is in flight per connection.
/// - Request identifiers start at 1 and never repeat on a connection, across
///   re-opened streams included.
/// - The channel holds a stream only between completed exchanges.
#[derive(Debug)]
pub struct FramedConnection<S> {
    /// Guarded stream and id counter.
    channel: Mutex<Channel<S>>,
    /// Replaces a broken stream, when set.
    opener: Option<Arc<dyn StreamOpener<S>>>,
    /// Per-exchange deadline.
    request_timeout: Option<Duration>,
    /// Frame size limit.
    max_frame_bytes: usize,
}

impl<S> FramedConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an established stream.
    #[must_use]
    pub fn new(stream: S, settings: &ClientSettings) -> Self {
        Self {
            channel: Mutex::new(Channel {
                stream: Some(stream),
                closed: false,
                next_id: 1,
            }),
            opener: None,
            request_timeout: settings.request_timeout,
            max_frame_bytes: settings.max_frame_bytes,
        }
    }

    /// Re-opens broken streams through `opener` instead of failing.
    #[must_use]
    pub fn with_opener(mut self, opener: Arc<dyn StreamOpener<S>>) -> Self {
        self.opener = Some(opener);
        self
    }

    /// Returns true while the stream is usable.
    pub async fn is_connected(&self) -> bool {
        self.channel.lock().await.stream.is_some()
    }

    /// Sends one request and returns its result value.
    ///
    /// # Errors
    ///
    /// Returns the server error for rejected requests, or a transport,
    /// protocol, or timeout error after which the stream is dropped. A
    /// dropped stream is re-opened on the next call when an opener is set.
    pub async fn call(&self, method: Method, params: Value) -> Result<Value, StoreError> {
        let mut channel = self.channel.lock().await;
        if channel.closed {
            return Err(ClientError::Disconnected.into());
        }
        let id = channel.reserve_id()?;
        let bytes = encode_request(&Request {
            id,
            method,
            params,
        })?;
        // Dropping this future mid-exchange drops the taken stream with it.
        let mut stream = match channel.stream.take() {
            Some(stream) => stream,
            None => self.reopen().await?,
        };
        let pending = exchange(&mut stream, id, &bytes, self.max_frame_bytes);
        let outcome = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .unwrap_or_else(|_| Err(ClientError::Timeout(duration_millis(limit)))),
            None => pending.await,
        };
        match outcome {
            Ok(response) => {
                channel.stream = Some(stream);
                response.into_result()
            }
            Err(err) => {
                warn!(request_id = id, method = %method, error = %err, "store channel dropped");
                Err(err.into())
            }
        }
    }

    /// Opens a replacement stream, or fails when no opener is set.
    async fn reopen(&self) -> Result<S, StoreError> {
        let Some(opener) = &self.opener else {
            return Err(ClientError::Disconnected.into());
        };
        let stream = opener.open().await?;
        debug!("store channel re-opened");
        Ok(stream)
    }
}

/// Whole milliseconds in `duration`, saturating.
fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Writes one request frame and reads its matching response.
async fn exchange<S>(
    stream: &mut S,
    id: u64,
    request: &[u8],
    limit: usize,
) -> Result<Response, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_frame(stream, request, limit).await?;
    let reply = read_frame(stream, limit).await?;
    let response = decode_response(&reply)?;
    if response.id != id {
        return Err(ClientError::Protocol(format!(
            "response id {} does not match request id {id}",
            response.id
        )));
    }
    Ok(response)
}

#[async_trait]
impl<S> StoreConnection for FramedConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn open_database(&self, name: &str) -> Result<DatabaseHandle, StoreError> {
        let value = self.call(Method::OpenDatabase, json!({ "name": name })).await?;
        let reply: OpenReply = parse_reply(Method::OpenDatabase, value)?;
        Ok(DatabaseHandle {
            name: name.to_string(),
            id: reply.id,
        })
    }

    async fn close_database(&self, handle: &DatabaseHandle) -> Result<(), StoreError> {
        self.call(Method::CloseDatabase, handle_params(handle)).await.map(drop)
    }

    async fn create(
        &self,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        let params = document_params(handle, collection, doc_id, Some(payload));
        self.call(Method::Create, params).await.map(drop)
    }

    async fn read(
        &self,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let params = document_params(handle, collection, doc_id, None);
        let value = self.call(Method::Read, params).await?;
        let reply: ReadReply = parse_reply(Method::Read, value)?;
        reply.payload.as_deref().map(decode_payload).transpose()
    }

    async fn update(
        &self,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        let params = document_params(handle, collection, doc_id, Some(payload));
        self.call(Method::Update, params).await.map(drop)
    }

    async fn delete(
        &self,
        handle: &DatabaseHandle,
        collection: &str,
        doc_id: &str,
    ) -> Result<(), StoreError> {
        let params = document_params(handle, collection, doc_id, None);
        self.call(Method::Delete, params).await.map(drop)
    }

    async fn healing_stats(&self, handle: &DatabaseHandle) -> Result<HealingStats, StoreError> {
        let value = self.call(Method::HealingStats, handle_params(handle)).await?;
        parse_reply(Method::HealingStats, value)
    }

    async fn close(&self) -> Result<(), StoreError> {
        let stream = {
            let mut channel = self.channel.lock().await;
            channel.closed = true;
            channel.stream.take()
        };
        let Some(mut stream) = stream else {
            return Ok(());
        };
        stream
            .shutdown()
            .await
            .map_err(|err| StoreError::Transport(format!("shutdown failed: {err}")))
    }
}

// ============================================================================
// SECTION: Connector
// ============================================================================

/// Opens [`FramedConnection`]s to a store over TCP.
#[derive(Debug, Clone)]
pub struct TcpStoreConnector {
    /// `host:port` of the store.
    address: String,
    /// Settings applied to every connection.
    settings: ClientSettings,
}

impl TcpStoreConnector {
    /// Creates a connector for `address`.
    #[must_use]
    pub fn new(address: impl Into<String>, settings: ClientSettings) -> Self {
        Self {
            address: address.into(),
            settings,
        }
    }

    /// Store address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connection settings.
    #[must_use]
    pub const fn settings(&self) -> &ClientSettings {
        &self.settings
    }
}

#[async_trait]
impl StreamOpener<TcpStream> for TcpStoreConnector {
    async fn open(&self) -> Result<TcpStream, StoreError> {
        let stream =
            tokio::time::timeout(self.settings.connect_timeout, TcpStream::connect(&self.address))
                .await
                .map_err(|_| {
                    StoreError::Timeout(format!("connecting to {} timed out", self.address))
                })?
                .map_err(|err| {
                    StoreError::Connection(format!("connecting to {} failed: {err}", self.address))
                })?;
        stream
            .set_nodelay(true)
            .map_err(|err| StoreError::Connection(format!("set_nodelay failed: {err}")))?;
        debug!(address = %self.address, "store stream opened");
        Ok(stream)
    }
}

#[async_trait]
impl StoreConnector for TcpStoreConnector {
    async fn connect(&self) -> Result<Arc<dyn StoreConnection>, StoreError> {
        let stream = self.open().await?;
        let connection = FramedConnection::new(stream, &self.settings)
            .with_opener(Arc::new(self.clone()));
        Ok(Arc::new(connection))
    }
}
