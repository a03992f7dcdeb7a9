/// Errors returned by registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    /// No record exists for the given agent id.
    #[error("unknown student '{0}'")]
    UnknownStudent(String),
}

pub type Result<T> = std::result::Result<T, RosterError>;
