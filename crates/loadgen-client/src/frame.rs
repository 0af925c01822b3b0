// crates/loadgen-client/src/frame.rs
// ============================================================================
// Module: Frame Codec
// Description: Length-prefixed framing for the store wire protocol.
// Purpose: Read and write whole frames over any async byte stream.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! A frame is a 4-byte little-endian length followed by that many payload
//! bytes. Readers reject declared lengths above the configured limit before
//! allocating.
//!
//! Security posture: frame lengths come from the peer and are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::ClientError;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Default maximum frame payload size in bytes.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
const PREFIX_BYTES: usize = 4;

// ============================================================================
// SECTION: Codec
// ============================================================================

/// Reads one frame from `reader`.
///
/// # Errors
///
/// Returns [`ClientError::Closed`] on a clean end of stream before the
/// prefix, [`ClientError::FrameTooLarge`] when the declared length exceeds
/// `limit`, and [`ClientError::Io`] on read failures.
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>, ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; PREFIX_BYTES];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ClientError::Closed);
        }
        Err(err) => return Err(ClientError::Io(format!("frame read failed: {err}"))),
    }
    let declared = u32::from_le_bytes(prefix);
    let len = usize::try_from(declared).unwrap_or(usize::MAX);
    if len > limit {
        return Err(ClientError::FrameTooLarge {
            actual: len,
            limit,
        });
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|err| ClientError::Io(format!("frame read failed: {err}")))?;
    Ok(buf)
}

/// Writes `payload` as one frame and flushes `writer`.
///
/// # Errors
///
/// Returns [`ClientError::FrameTooLarge`] when `payload` exceeds `limit` or
/// the prefix range, and [`ClientError::Io`] on write failures.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], limit: usize) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    let too_large = ClientError::FrameTooLarge {
        actual: payload.len(),
        limit,
    };
    if payload.len() > limit {
        return Err(too_large);
    }
    let len = u32::try_from(payload.len()).map_err(|_| too_large)?;
    let mut frame = Vec::with_capacity(PREFIX_BYTES.saturating_add(payload.len()));
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    writer
        .write_all(&frame)
        .await
        .map_err(|err| ClientError::Io(format!("frame write failed: {err}")))?;
    writer.flush().await.map_err(|err| ClientError::Io(format!("frame flush failed: {err}")))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
