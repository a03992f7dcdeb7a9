use std::time::Duration;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header does not start with the magic bytes.
    #[error("invalid frame magic (expected 0x4845 \"HE\")")]
    InvalidMagic,

    /// Fewer bytes than a full header were supplied.
    #[error("malformed frame header ({len} bytes, need 8)")]
    MalformedHeader { len: usize },

    /// Declared payload length is zero or above the configured bound.
    #[error("payload length out of range ({size} bytes, max {max})")]
    PayloadOutOfRange { size: usize, max: usize },

    /// A header or payload read did not complete in time.
    #[error("frame read timed out after {0:?}")]
    Timeout(Duration),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True for errors caused by the peer violating the wire format.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidMagic
                | FrameError::MalformedHeader { .. }
                | FrameError::PayloadOutOfRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
