//! Live roster of connected agents.
//!
//! [`StudentRegistry`] is the single owner of agent records. Sessions mutate
//! it through the [`Roster`] capability; the presentation side reads sorted
//! snapshots and turns bitmaps into render handles through [`ImageCache`].

pub mod config;
pub mod error;
pub mod image_cache;
pub mod registry;
pub mod roster;
pub mod student;

pub use config::{RegistryConfig, SortConfig, SortField};
pub use error::{Result, RosterError};
pub use image_cache::ImageCache;
pub use registry::StudentRegistry;
pub use roster::Roster;
pub use student::{Bitmap, Student};
