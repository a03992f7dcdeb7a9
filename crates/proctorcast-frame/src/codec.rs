use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::kind::FrameKind;

/// Frame header: magic (2) + type (2) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "HE" (0x48 0x45).
pub const MAGIC: [u8; 2] = *b"HE";

/// Default maximum payload size: 5 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 5 * 1024 * 1024;

/// Default bound on each header or payload read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw type tag.
    pub tag: u16,
    /// Declared payload length in bytes.
    pub length: u32,
}

impl FrameHeader {
    /// Classified frame type.
    pub fn kind(&self) -> FrameKind {
        FrameKind::from_tag(self.tag)
    }
}

/// A complete typed frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame type.
    pub kind: FrameKind,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(kind: impl Into<FrameKind>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame header.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬───────────┬──────────────────┐
/// │ Magic (2B)   │ Type      │ Length    │ Payload          │
/// │ 0x48 0x45    │ (2B BE)   │ (4B BE)   │ (Length bytes)   │
/// │ "HE"         │           │           │                  │
/// └──────────────┴───────────┴───────────┴──────────────────┘
/// ```
pub fn encode_header(tag: u16, length: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..2].copy_from_slice(&MAGIC);
    header[2..4].copy_from_slice(&tag.to_be_bytes());
    header[4..8].copy_from_slice(&length.to_be_bytes());
    header
}

/// Append `header ++ payload` to `dst`.
pub fn encode_frame(tag: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let length = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadOutOfRange {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&encode_header(tag, length));
    dst.put_slice(payload);
    Ok(())
}

/// Decode a full header.
///
/// Only the magic is checked here; the declared length is reported as-is and
/// bounded by the caller with [`validate_length`].
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<FrameHeader> {
    if header[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    Ok(FrameHeader {
        tag: u16::from_be_bytes([header[2], header[3]]),
        length: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
    })
}

/// Decode a header from the first [`HEADER_SIZE`] bytes of `src`.
pub fn decode_header_slice(src: &[u8]) -> Result<FrameHeader> {
    let header: &[u8; HEADER_SIZE] = src
        .get(..HEADER_SIZE)
        .and_then(|head| head.try_into().ok())
        .ok_or(FrameError::MalformedHeader { len: src.len() })?;
    decode_header(header)
}

/// Check a declared payload length against `0 < length <= max_payload`.
pub fn validate_length(length: u32, max_payload: usize) -> Result<usize> {
    let size = length as usize;
    if size == 0 || size > max_payload {
        return Err(FrameError::PayloadOutOfRange {
            size,
            max: max_payload,
        });
    }
    Ok(size)
}

/// Configuration for frame I/O.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 5 MiB.
    pub max_payload_size: usize,
    /// Bound on each header and payload read. Default: 10s.
    pub read_timeout: Option<Duration>,
    /// Bound on each frame write. Default: none.
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            write_timeout: None,
        }
    }
}
