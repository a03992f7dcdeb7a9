use std::io::ErrorKind;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 64 * 1024;

/// Writes complete frames to any `AsyncWrite` stream.
///
/// Header and payload go out in a single buffered write so a frame is never
/// interleaved with another on the same stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.kind.tag(), frame.payload.as_ref()).await
    }

    /// Encode and send a payload with the given type tag.
    ///
    /// Empty payloads and payloads above the configured bound are refused,
    /// since the receiving side would drop the connection for them.
    pub async fn send(&mut self, tag: u16, payload: &[u8]) -> Result<()> {
        if payload.is_empty() || payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadOutOfRange {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(tag, payload, &mut self.buf)?;

        let (inner, buf) = (&mut self.inner, &self.buf);
        let write = async move {
            inner.write_all(buf).await?;
            inner.flush().await
        };
        let result = match self.config.write_timeout {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .map_err(|_| FrameError::Timeout(limit))?,
            None => write.await,
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::WriteZero => Err(FrameError::ConnectionClosed),
            Err(err) => Err(FrameError::Io(err)),
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use super::*;
    use crate::codec::{decode_header_slice, HEADER_SIZE};
    use crate::kind::{FrameKind, MESSAGE, NAME, PICTURE};
    use crate::reader::FrameReader;

    #[tokio::test]
    async fn write_single_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(NAME, b"A42###Ada").await.unwrap();

        let wire = writer.into_inner().into_inner();
        let header = decode_header_slice(&wire).unwrap();
        assert_eq!(header.tag, NAME);
        assert_eq!(header.length, 9);
        assert_eq!(&wire[HEADER_SIZE..], b"A42###Ada");
    }

    #[tokio::test]
    async fn payload_passes_through_unmodified() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let expected = payload.clone();
        let send = tokio::spawn(async move {
            writer.send(PICTURE, &payload).await.unwrap();
            writer
        });

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.kind, FrameKind::Image(PICTURE));
        assert_eq!(frame.payload.as_ref(), expected.as_slice());
        drop(send.await.unwrap());
    }

    #[tokio::test]
    async fn write_frame_method() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let frame = Frame::new(MESSAGE, "hello observer");

        writer.write_frame(&frame).await.unwrap();

        let wire = writer.into_inner().into_inner();
        let mut reader = FrameReader::new(Cursor::new(wire));
        let decoded = reader.read_frame().await.unwrap();
        assert_eq!(decoded.kind, FrameKind::Message);
        assert_eq!(decoded.payload.as_ref(), b"hello observer");
    }

    #[tokio::test]
    async fn payload_too_large_rejected() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.send(PICTURE, b"oversized").await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadOutOfRange { size: 9, max: 4 }));
        assert!(writer.get_ref().get_ref().is_empty());
    }

    #[tokio::test]
    async fn empty_payload_rejected() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let err = writer.send(MESSAGE, b"").await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadOutOfRange { size: 0, .. }));
    }

    #[tokio::test]
    async fn closed_peer_reports_error() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);

        let mut writer = FrameWriter::new(client);
        let err = writer.send(PICTURE, b"nobody-listening").await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_) | FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn write_timeout_applies_to_blocked_peer() {
        let (client, _server) = tokio::io::duplex(8);
        let cfg = FrameConfig {
            write_timeout: Some(Duration::from_millis(50)),
            ..FrameConfig::default()
        };

        let mut writer = FrameWriter::with_config(client, cfg);
        let err = writer.send(PICTURE, &[7u8; 1024]).await.unwrap_err();
        assert!(matches!(err, FrameError::Timeout(_)));
    }

    #[tokio::test]
    async fn accessors_and_into_inner() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        let _ = writer.get_ref();
        let _ = writer.get_mut();
        assert!(writer.config().write_timeout.is_none());
        let _inner = writer.into_inner();
    }
}
