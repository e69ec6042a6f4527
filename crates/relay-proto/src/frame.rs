//! Length-prefixed JSON framing for the panel stream socket.
//!
//! A frame is a 4-byte big-endian length followed by exactly that many bytes
//! of JSON. Readers either get a whole value or an error; there is no way to
//! skip a bad frame and keep reading, because a misread prefix leaves the
//! stream desynchronized.

use std::fmt;
use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub const PREFIX_LEN: usize = 4;
/// Upper bound on a declared body length, checked before allocating.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Which half of a frame a reader was working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Prefix,
    Body,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameStage::Prefix => f.write_str("prefix"),
            FrameStage::Body => f.write_str("body"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("stream closed before frame {stage} was complete")]
    Truncated { stage: FrameStage },
    #[error("frame length {len} exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },
    #[error("frame payload is not valid json: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("io error on frame {stage}: {source}")]
    Io {
        stage: FrameStage,
        #[source]
        source: io::Error,
    },
}

impl FramingError {
    /// The stage a read failed in, if the failure happened while reading.
    pub fn stage(&self) -> Option<FrameStage> {
        match self {
            FramingError::Truncated { stage } | FramingError::Io { stage, .. } => Some(*stage),
            FramingError::TooLarge { .. } => Some(FrameStage::Prefix),
            FramingError::Payload(_) => None,
        }
    }

    fn from_read(stage: FrameStage, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FramingError::Truncated { stage }
        } else {
            FramingError::Io { stage, source: err }
        }
    }
}

/// Serialize `value` and prepend its big-endian length.
pub fn encode<T>(value: &T) -> Result<Vec<u8>, FramingError>
where
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_vec(value).map_err(FramingError::Payload)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(FramingError::TooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(PREFIX_LEN + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Encode `value` and write the whole frame to `writer`.
pub fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), FramingError>
where
    W: Write + ?Sized,
    T: Serialize + ?Sized,
{
    let bytes = encode(value)?;
    writer
        .write_all(&bytes)
        .and_then(|()| writer.flush())
        .map_err(|source| FramingError::Io {
            stage: FrameStage::Body,
            source,
        })
}

/// Block until the 4-byte prefix is read and return the declared body length.
pub fn read_prefix<R>(reader: &mut R) -> Result<usize, FramingError>
where
    R: Read + ?Sized,
{
    let mut len_buf = [0u8; PREFIX_LEN];
    reader
        .read_exact(&mut len_buf)
        .map_err(|err| FramingError::from_read(FrameStage::Prefix, err))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FramingError::TooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(len)
}

/// Block until exactly `len` body bytes are read and deserialize them.
pub fn read_body<R, T>(reader: &mut R, len: usize) -> Result<T, FramingError>
where
    R: Read + ?Sized,
    T: DeserializeOwned,
{
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|err| FramingError::from_read(FrameStage::Body, err))?;
    serde_json::from_slice(&buf).map_err(FramingError::Payload)
}

/// Read one complete frame from `reader`.
pub fn decode<R, T>(reader: &mut R) -> Result<T, FramingError>
where
    R: Read + ?Sized,
    T: DeserializeOwned,
{
    let len = read_prefix(reader)?;
    read_body(reader, len)
}
