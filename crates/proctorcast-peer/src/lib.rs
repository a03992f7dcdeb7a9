//! Connection lifecycle for observers and agents.
//!
//! Observer side: [`Server`] accepts agent streams and runs one session task
//! per connection, feeding the roster through the [`Roster`] capability.
//! Disconnected agents are removed only after a grace period with no newer
//! connection for the same id.
//!
//! Agent side: [`Client`] drives discovery, connect, identify, and stream,
//! retrying with exponential backoff until stopped.
//!
//! [`Roster`]: proctorcast_roster::Roster

pub mod backoff;
pub mod collab;
pub mod connector;
pub mod error;
pub mod identity;
pub mod listener;
pub mod liveness;
pub mod session;

pub use backoff::Backoff;
pub use collab::{ImageCrateDecoder, ImageDecoder, ScreenCapture};
pub use connector::{Client, ClientConfig, ClientEvent, ClientHandle, ClientState, ClientStatus};
pub use error::{PeerError, Result};
pub use identity::{format_identity, parse_identity, Identity, IDENTITY_SEPARATOR};
pub use listener::{Server, ServerConfig, ServerHandle, DEFAULT_GRACE_PERIOD};
pub use liveness::{ConnectionStamp, LivenessTracker};
pub use session::{run_session, SessionContext, SessionEnd, SessionSummary};
