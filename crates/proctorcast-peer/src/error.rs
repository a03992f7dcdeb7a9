/// Errors that can occur in observer and agent operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Socket or discovery error.
    #[error("transport error: {0}")]
    Transport(#[from] proctorcast_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] proctorcast_frame::FrameError),

    /// Roster mutation failed.
    #[error("roster error: {0}")]
    Roster(#[from] proctorcast_roster::RosterError),

    /// Identity string is missing the separator or carries an empty id.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// The capture collaborator failed to produce an image.
    #[error("screen capture failed: {0}")]
    Capture(String),

    /// The decode collaborator rejected an image payload.
    #[error("image decode failed: {0}")]
    Decode(String),

    /// The agent has no open stream to the observer.
    #[error("not connected to an observer")]
    NotConnected,

    /// The client or server has been stopped.
    #[error("stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, PeerError>;
