//! Frame type tags.
//!
//! Tags 0 and 1 are reserved for identity and diagnostics.
//! Every other tag carries an image payload; agents send [`PICTURE`].

/// Agent identity (`"<id>###<name>"`), sent once per connection.
pub const NAME: u16 = 0;

/// Free-form diagnostic text.
pub const MESSAGE: u16 = 1;

/// Compressed screen image.
pub const PICTURE: u16 = 2;

/// Classified frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Name,
    Message,
    /// Image payload, carrying the raw tag it arrived with.
    Image(u16),
}

impl FrameKind {
    /// Classify a wire tag.
    pub fn from_tag(tag: u16) -> Self {
        match tag {
            NAME => FrameKind::Name,
            MESSAGE => FrameKind::Message,
            other => FrameKind::Image(other),
        }
    }

    /// Wire tag for this kind.
    pub fn tag(self) -> u16 {
        match self {
            FrameKind::Name => NAME,
            FrameKind::Message => MESSAGE,
            FrameKind::Image(tag) => tag,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            FrameKind::Name => "NAME",
            FrameKind::Message => "MESSAGE",
            FrameKind::Image(PICTURE) => "PICTURE",
            FrameKind::Image(_) => "IMAGE",
        }
    }
}

impl From<u16> for FrameKind {
    fn from(tag: u16) -> Self {
        Self::from_tag(tag)
    }
}
