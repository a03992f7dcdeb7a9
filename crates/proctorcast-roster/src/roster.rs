use crate::error::Result;
use crate::student::Bitmap;

/// Roster mutations a session is allowed to perform.
///
/// Session handlers depend only on this capability, never on a concrete
/// presentation type.
pub trait Roster: Send + Sync {
    /// Create a record for a new agent.
    fn add_student(&self, id: &str, name: &str);

    /// Drop an agent's record.
    fn remove_student(&self, id: &str);

    /// Replace an agent's image.
    fn update_image(&self, id: &str, image: Bitmap) -> Result<()>;

    /// Change an agent's display name.
    fn update_name(&self, id: &str, name: &str) -> Result<()>;

    /// Whether a record exists for `id`.
    fn exists(&self, id: &str) -> bool;
}
