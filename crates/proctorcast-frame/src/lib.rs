//! Length-prefixed, typed framing for the snapshot stream.
//!
//! Every message on the persistent stream is framed with:
//! - A 2-byte magic number ("HE") for stream synchronization
//! - A 2-byte big-endian frame type (NAME, MESSAGE, or image payload)
//! - A 4-byte big-endian payload length
//!
//! The header codec is pure. [`FrameReader`] and [`FrameWriter`] add the
//! async I/O, the payload bound, and per-read timeouts.

pub mod codec;
pub mod error;
pub mod kind;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_header, decode_header_slice, encode_frame, encode_header, validate_length, Frame,
    FrameConfig, FrameHeader, DEFAULT_MAX_PAYLOAD, DEFAULT_READ_TIMEOUT, HEADER_SIZE, MAGIC,
};
pub use error::{FrameError, Result};
pub use kind::{FrameKind, MESSAGE, NAME, PICTURE};
pub use reader::FrameReader;
pub use writer::FrameWriter;
