//! Frame layout for journal records.
//!
//! ```text
//! [length: u32 LE][crc32 of length ++ payload: u32 LE][payload: JSON]
//! ```
//!
//! The checksum covers the length prefix as well, so a damaged length is
//! reported as corruption instead of steering the reader into garbage.

use std::io::{self, Read};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::storage::traits::StorageError;

/// Largest payload a single frame may carry (16 MiB).
pub const MAX_PAYLOAD: u32 = 16 * 1024 * 1024;

const PREFIX_LEN: usize = 8;

/// Why a frame could not be produced or read back.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Input ended inside a frame.
    #[error("frame cut short")]
    Torn,

    /// Stored and recomputed checksums differ.
    #[error("frame checksum mismatch: stored={stored:08x}, computed={computed:08x}")]
    Checksum {
        /// Checksum found in the frame.
        stored: u32,
        /// Checksum of the bytes actually read.
        computed: u32,
    },

    /// Payload length above [`MAX_PAYLOAD`].
    #[error("frame payload of {0} bytes exceeds {MAX_PAYLOAD}")]
    Oversized(u64),

    /// Payload is not valid JSON for the expected type.
    #[error("frame payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The underlying reader failed.
    #[error("frame I/O: {0}")]
    Io(io::Error),
}

impl From<FrameError> for StorageError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => Self::Io(e),
            FrameError::Payload(e) => Self::SerializationError(e.to_string()),
            other => Self::BackendError(other.to_string()),
        }
    }
}

fn frame_crc(len: [u8; 4], payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&len);
    hasher.update(payload);
    hasher.finalize()
}

/// Serialize `record` into one complete frame.
///
/// # Errors
/// `Payload` if serialization fails, `Oversized` above [`MAX_PAYLOAD`].
pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(record)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_PAYLOAD)
        .ok_or_else(|| FrameError::Oversized(u64::try_from(payload.len()).unwrap_or(u64::MAX)))?;

    let len = len.to_le_bytes();
    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len);
    frame.extend_from_slice(&frame_crc(len, &payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read the next frame. `Ok(None)` means the input ended cleanly between frames.
///
/// # Errors
/// `Torn` for a partial frame, `Checksum`/`Oversized`/`Payload` for a damaged
/// one, `Io` when the reader itself fails.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> Result<Option<T>, FrameError> {
    let mut prefix = [0u8; PREFIX_LEN];
    match fill(reader, &mut prefix)? {
        0 => return Ok(None),
        n if n < PREFIX_LEN => return Err(FrameError::Torn),
        _ => {}
    }

    let len_bytes = [prefix[0], prefix[1], prefix[2], prefix[3]];
    let stored = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_PAYLOAD {
        return Err(FrameError::Oversized(u64::from(len)));
    }

    let len = usize::try_from(len).map_err(|_| FrameError::Oversized(u64::from(len)))?;
    let mut payload = vec![0u8; len];
    if fill(reader, &mut payload)? < len {
        return Err(FrameError::Torn);
    }

    let computed = frame_crc(len_bytes, &payload);
    if stored != computed {
        return Err(FrameError::Checksum { stored, computed });
    }
    Ok(Some(serde_json::from_slice(&payload)?))
}

/// Read until `buf` is full or the input ends; returns the bytes read.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize, FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    Ok(filled)
}
