//! LAN screen-snapshot monitoring.
//!
//! Agents find an observer through a UDP beacon, open one TCP stream, and
//! push framed screen images tagged with their identity. The observer keeps
//! a live roster of connected agents and their latest image.
//!
//! # Crate Structure
//!
//! - [`transport`]: socket tuning and UDP discovery
//! - [`frame`]: the `"HE"` framing codec with async reader/writer
//! - [`roster`]: agent registry, sort controls, image identity cache
//! - [`peer`]: observer sessions and the agent state machine (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use proctorcast_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use proctorcast_frame::*;
}

/// Re-export roster types.
pub mod roster {
    pub use proctorcast_roster::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use proctorcast_peer::*;
}
