//! Length-Prefixed Framing
//!
//! Both TCP connections (agent-facing and game-facing) carry the same frame
//! layout:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────┐
//! │ len: u16 BE  │ payload: `len` bytes                 │
//! └──────────────┴──────────────────────────────────────┘
//!                  payload = bincode(enum)
//!                  first 4 bytes = u32 LE variant index (the schema tag)
//! ```
//!
//! A payload that does not fit in the prefix is an encoding error and is
//! never put on the wire.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Width of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Width of the bincode variant index that leads every payload.
pub const TAG_SIZE: usize = 4;

/// A message enum that can travel inside a frame.
///
/// `TAG_COUNT` must equal the number of variants of the enum; tags at or
/// beyond it are rejected before bincode sees the payload.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Number of variants (valid tags are `0..TAG_COUNT`).
    const TAG_COUNT: u32;
}

/// Framing errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Buffer ends before the frame does.
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required to finish the frame.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// Length prefix cannot describe a valid payload.
    #[error("invalid frame length {0}")]
    InvalidLength(usize),

    /// Payload tag is not a known message kind.
    #[error("unknown message tag {0}")]
    UnknownTag(u32),

    /// Encoded message does not fit in a frame.
    #[error("message of {0} bytes exceeds the frame limit")]
    Oversized(usize),

    /// Serialization failed.
    #[error("encode error: {0}")]
    Encode(bincode::Error),

    /// Payload failed to deserialize.
    #[error("decode error: {0}")]
    Decode(bincode::Error),

    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode a message into a complete frame.
pub fn encode<M: WireMessage>(message: &M) -> Result<Bytes, FrameError> {
    let payload = bincode::serialize(message).map_err(FrameError::Encode)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::Oversized(payload.len()));
    }

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.put_u16(payload.len() as u16);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

/// Decode a payload (frame body without its prefix).
pub fn decode_payload<M: WireMessage>(payload: &[u8]) -> Result<M, FrameError> {
    if payload.len() < TAG_SIZE {
        return Err(FrameError::InvalidLength(payload.len()));
    }

    let tag = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    if tag >= M::TAG_COUNT {
        #[cfg(feature = "debug-tracing")]
        debug!(payload = %hex::encode(&payload[..payload.len().min(32)]), "unknown tag");
        return Err(FrameError::UnknownTag(tag));
    }

    bincode::deserialize(payload).map_err(FrameError::Decode)
}

/// Decode one frame from the front of `buf`.
///
/// Returns the message and the number of bytes consumed.
pub fn decode<M: WireMessage>(buf: &[u8]) -> Result<(M, usize), FrameError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Err(FrameError::Truncated {
            needed: LENGTH_PREFIX_SIZE,
            available: buf.len(),
        });
    }

    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if len == 0 {
        return Err(FrameError::InvalidLength(0));
    }

    let total = LENGTH_PREFIX_SIZE + len;
    if buf.len() < total {
        return Err(FrameError::Truncated {
            needed: total,
            available: buf.len(),
        });
    }

    let message = decode_payload(&buf[LENGTH_PREFIX_SIZE..total])?;
    Ok((message, total))
}

/// Write one message as a single frame.
pub async fn write_message<W, M>(writer: &mut W, message: &M) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    M: WireMessage,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Pull-based frame reader over any async byte stream.
///
/// Iteration is finite: `Ok(None)` marks the end of the connection, whether
/// the peer closed cleanly between frames or in the middle of one.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next raw payload.
    pub async fn next_payload(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        if !read_full(&mut self.inner, &mut prefix).await? {
            return Ok(None);
        }

        let len = u16::from_be_bytes(prefix) as usize;
        if len == 0 {
            return Err(FrameError::InvalidLength(0));
        }

        let mut payload = vec![0u8; len];
        if !read_full(&mut self.inner, &mut payload).await? {
            debug!(expected = len, "stream ended mid-frame");
            return Ok(None);
        }

        trace!(len, "frame received");
        Ok(Some(payload))
    }

    /// Read and decode the next message.
    pub async fn next_message<M: WireMessage>(&mut self) -> Result<Option<M>, FrameError> {
        match self.next_payload().await? {
            Some(payload) => decode_payload(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// Recover the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Fill `buf` completely. `Ok(false)` if the stream ended first.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if is_closing(&e) => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn is_closing(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
