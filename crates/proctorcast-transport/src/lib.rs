//! Network plumbing for proctorcast.
//!
//! Two concerns live here, both below the framing layer:
//! - TCP socket tuning (no-delay, keep-alive) for the persistent stream
//! - UDP broadcast discovery: the observer's beacon and the agent's listener
//!
//! The same port number is used for the TCP stream and the UDP beacon.

pub mod discovery;
pub mod error;
pub mod socket;

pub use discovery::{discover_server, Beacon, DiscoveryConfig, BEACON_PAYLOAD};
pub use error::{Result, TransportError};
pub use socket::{bind_tcp, configure_stream, connect_tcp, SocketConfig};
