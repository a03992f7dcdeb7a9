//! External collaborators: screen capture on the agent, image decoding on
//! the observer. Both are swappable; closures work for either.

use std::sync::Arc;

use bytes::Bytes;
use proctorcast_roster::Bitmap;

use crate::error::{PeerError, Result};

/// Produces one encoded screen image per call.
///
/// Called from a blocking worker thread, so implementations may block.
pub trait ScreenCapture: Send + 'static {
    fn capture(&mut self) -> Result<Bytes>;
}

impl<F> ScreenCapture for F
where
    F: FnMut() -> Result<Bytes> + Send + 'static,
{
    fn capture(&mut self) -> Result<Bytes> {
        self()
    }
}

/// Turns an image payload into a bitmap.
///
/// Called from a blocking worker thread.
pub trait ImageDecoder: Send + Sync + 'static {
    fn decode(&self, payload: &[u8]) -> Result<Bitmap>;
}

impl<F> ImageDecoder for F
where
    F: Fn(&[u8]) -> Result<Bitmap> + Send + Sync + 'static,
{
    fn decode(&self, payload: &[u8]) -> Result<Bitmap> {
        self(payload)
    }
}

/// Decoder backed by the `image` crate. Format is guessed from content.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Bitmap> {
        image::load_from_memory(payload)
            .map(Arc::new)
            .map_err(|err| PeerError::Decode(err.to_string()))
    }
}
