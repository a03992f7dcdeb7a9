use std::io::ErrorKind;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::codec::{decode_header, validate_length, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Reads complete frames from any `AsyncRead` stream.
///
/// The header and the payload are each read under the configured timeout.
/// A header with bad magic or an out-of-range length is reported before any
/// payload byte is consumed; the stream is unusable afterwards.
pub struct FrameReader<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        read_exact_timed(&mut self.inner, &mut header, self.config.read_timeout).await?;

        let header = decode_header(&header)
            .inspect_err(|err| debug!(error = %err, "rejected frame header"))?;
        let size = validate_length(header.length, self.config.max_payload_size).inspect_err(|err| {
            debug!(tag = header.tag, length = header.length, error = %err, "rejected frame length")
        })?;

        let mut payload = BytesMut::zeroed(size);
        read_exact_timed(&mut self.inner, &mut payload, self.config.read_timeout).await?;
        trace!(tag = header.tag, size, "frame read");

        Ok(Frame {
            kind: header.kind(),
            payload: payload.freeze(),
        })
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

async fn read_exact_timed<T: AsyncRead + Unpin>(
    inner: &mut T,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<()> {
    let read = inner.read_exact(buf);
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| FrameError::Timeout(limit))?,
        None => read.await,
    };

    match result {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(FrameError::ConnectionClosed),
        Err(err) => Err(FrameError::Io(err)),
    }
}
