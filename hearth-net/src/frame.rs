//! Length-prefixed message framing.
//!
//! Every frame is a 4-byte little-endian `u32` length followed by exactly
//! that many payload bytes. Both directions of the command channel use the
//! same framing; discovery datagrams carry a bare JSON document instead
//! (UDP already preserves message boundaries).

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetError;

/// Upper bound on a single frame payload. A prefix above this is treated as
/// malformed input rather than an allocation request.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(NetError::FrameTooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame, returning its payload bytes.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(NetError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Serialize a wire value to JSON bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NetError> {
    Ok(serde_json::to_vec(value)?)
}

/// Deserialize a wire value from JSON bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, NetError> {
    Ok(serde_json::from_slice(bytes)?)
}
