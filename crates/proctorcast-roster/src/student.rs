use std::sync::Arc;
use std::time::SystemTime;

use image::DynamicImage;

/// Decoded screen image. Opaque to the registry.
pub type Bitmap = Arc<DynamicImage>;

/// One connected agent as seen by the observer.
///
/// Records are immutable snapshots: the registry swaps in a new record on
/// every mutation, so a reader never sees a half-applied update.
#[derive(Debug, Clone)]
pub struct Student {
    id: String,
    name: String,
    image: Option<Bitmap>,
    image_version: u64,
    joined_at: SystemTime,
    updated_at: SystemTime,
}

impl Student {
    pub(crate) fn new(id: &str, name: &str) -> Self {
        let now = SystemTime::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            image: None,
            image_version: 0,
            joined_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn with_name(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    pub(crate) fn with_image(&self, image: Bitmap, version: u64) -> Self {
        Self {
            image: Some(image),
            image_version: version,
            updated_at: SystemTime::now(),
            ..self.clone()
        }
    }

    /// Stable external identifier (e.g. a roll number).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display label; may change across reconnections.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Most recent decoded image, if any arrived yet.
    pub fn image(&self) -> Option<&Bitmap> {
        self.image.as_ref()
    }

    /// Identity marker of the current image. Changes on every image update, 0 before the first.
    pub fn image_version(&self) -> u64 {
        self.image_version
    }

    /// When this record was created.
    pub fn joined_at(&self) -> SystemTime {
        self.joined_at
    }

    /// When the image last changed (creation time before the first image).
    pub fn updated_at(&self) -> SystemTime {
        self.updated_at
    }
}
