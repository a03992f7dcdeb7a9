//! Observer-side handling of one agent connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use proctorcast_frame::{FrameConfig, FrameError, FrameKind, FrameReader};
use proctorcast_roster::{Bitmap, Roster, RosterError};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collab::ImageDecoder;
use crate::error::{PeerError, Result};
use crate::identity::parse_identity;
use crate::liveness::{ConnectionStamp, LivenessTracker};

/// Everything a session needs from its server.
#[derive(Clone)]
pub struct SessionContext {
    pub roster: Arc<dyn Roster>,
    pub decoder: Arc<dyn ImageDecoder>,
    pub liveness: Arc<LivenessTracker>,
    pub frame_config: FrameConfig,
    /// Delay before a disconnected agent's record is removed. Zero removes
    /// immediately.
    pub grace_period: Duration,
    /// Server-wide stop signal.
    pub cancel: CancellationToken,
}

impl SessionContext {
    pub fn new(roster: Arc<dyn Roster>, decoder: Arc<dyn ImageDecoder>) -> Self {
        Self {
            roster,
            decoder,
            liveness: Arc::new(LivenessTracker::new()),
            frame_config: FrameConfig::default(),
            grace_period: crate::listener::DEFAULT_GRACE_PERIOD,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_frame_config(mut self, frame_config: FrameConfig) -> Self {
        self.frame_config = frame_config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Why a session loop ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The agent closed the connection.
    Closed,
    /// The server is stopping.
    Stopped,
    /// Malformed frame, read timeout, or I/O failure.
    Failed(FrameError),
}

/// Outcome of one connection.
#[derive(Debug)]
pub struct SessionSummary {
    /// Last identity the agent announced, if any.
    pub student_id: Option<String>,
    pub frames: u64,
    pub images: u64,
    pub end: SessionEnd,
}

struct Registration {
    id: String,
    name: String,
    stamp: ConnectionStamp,
}

/// Read frames from one agent until the connection ends, applying them to
/// the roster.
///
/// Invalid NAME payloads, frames before identification, and undecodable
/// images are dropped without ending the session. Framing violations and
/// read timeouts end it. When it ends for any reason other than server
/// stop, the agent's removal is scheduled after the grace period.
pub async fn run_session<S>(stream: S, peer: SocketAddr, ctx: &SessionContext) -> SessionSummary
where
    S: AsyncRead + Unpin,
{
    let mut reader = FrameReader::with_config(stream, ctx.frame_config.clone());
    let mut registration: Option<Registration> = None;
    let mut frames = 0u64;
    let mut images = 0u64;

    let end = loop {
        let frame = tokio::select! {
            _ = ctx.cancel.cancelled() => break SessionEnd::Stopped,
            frame = reader.read_frame() => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => break SessionEnd::Closed,
            Err(err) => break SessionEnd::Failed(err),
        };
        frames += 1;

        match frame.kind {
            FrameKind::Name => handle_name(ctx, peer, &frame.payload, &mut registration),
            FrameKind::Message => match &registration {
                Some(reg) => info!(
                    student_id = %reg.id,
                    text = %String::from_utf8_lossy(&frame.payload),
                    "agent message"
                ),
                None => debug!(%peer, "message before identification dropped"),
            },
            FrameKind::Image(tag) => {
                let Some(reg) = registration.as_mut() else {
                    debug!(%peer, tag, "image before identification dropped");
                    continue;
                };
                match decode(ctx, frame.payload).await {
                    Ok(bitmap) => {
                        if apply_image(ctx, peer, reg, bitmap) {
                            images += 1;
                        }
                    }
                    Err(err) => debug!(student_id = %reg.id, error = %err, "undecodable image dropped"),
                }
            }
        }
    };
    drop(reader);

    match &end {
        SessionEnd::Closed => debug!(%peer, "agent disconnected"),
        SessionEnd::Stopped => debug!(%peer, "session stopped"),
        SessionEnd::Failed(err) if err.is_protocol_violation() => {
            warn!(%peer, error = %err, "protocol violation, dropping connection")
        }
        SessionEnd::Failed(err) => info!(%peer, error = %err, "connection ended"),
    }

    if !matches!(end, SessionEnd::Stopped) {
        if let Some(reg) = &registration {
            schedule_removal(ctx, reg.id.clone(), reg.stamp);
        }
    }

    SessionSummary {
        student_id: registration.map(|reg| reg.id),
        frames,
        images,
        end,
    }
}

fn handle_name(ctx: &SessionContext, peer: SocketAddr, payload: &[u8], registration: &mut Option<Registration>) {
    let identity = match parse_identity(payload) {
        Ok(identity) => identity,
        Err(err) => {
            debug!(%peer, error = %err, "invalid identity dropped");
            return;
        }
    };

    // Re-identifying under a different id releases the old one.
    if let Some(previous) = registration.take() {
        if previous.id != identity.id {
            schedule_removal(ctx, previous.id, previous.stamp);
        }
    }

    let stamp = ctx.liveness.register(&identity.id);
    if ctx.roster.exists(&identity.id) {
        if let Err(err) = ctx.roster.update_name(&identity.id, &identity.name) {
            debug!(student_id = %identity.id, error = %err, "rename dropped");
        }
        info!(%peer, student_id = %identity.id, name = %identity.name, "agent reconnected");
    } else {
        ctx.roster.add_student(&identity.id, &identity.name);
        info!(%peer, student_id = %identity.id, name = %identity.name, "agent joined");
    }

    *registration = Some(Registration {
        id: identity.id,
        name: identity.name,
        stamp,
    });
}

/// Store a decoded image for a live, identified agent.
///
/// The record can be gone while this connection is still open when another
/// connection claimed the same id and then dropped. The live connection
/// claims the id back and re-creates the record.
fn apply_image(ctx: &SessionContext, peer: SocketAddr, reg: &mut Registration, bitmap: Bitmap) -> bool {
    match ctx.roster.update_image(&reg.id, Arc::clone(&bitmap)) {
        Ok(()) => return true,
        Err(RosterError::UnknownStudent(_)) => {}
    }

    warn!(%peer, student_id = %reg.id, "record removed while agent still connected, re-adding");
    reg.stamp = ctx.liveness.register(&reg.id);
    ctx.roster.add_student(&reg.id, &reg.name);
    match ctx.roster.update_image(&reg.id, bitmap) {
        Ok(()) => true,
        Err(err) => {
            warn!(student_id = %reg.id, error = %err, "image update dropped");
            false
        }
    }
}

async fn decode(ctx: &SessionContext, payload: Bytes) -> Result<Bitmap> {
    let decoder = Arc::clone(&ctx.decoder);
    tokio::task::spawn_blocking(move || decoder.decode(&payload))
        .await
        .map_err(|err| PeerError::Decode(err.to_string()))?
}

/// Remove `id` after the grace period unless a newer connection claimed it
/// or the server stopped first.
pub(crate) fn schedule_removal(ctx: &SessionContext, id: String, stamp: ConnectionStamp) {
    let roster = Arc::clone(&ctx.roster);
    let liveness = Arc::clone(&ctx.liveness);
    let cancel = ctx.cancel.clone();
    let grace = ctx.grace_period;

    tokio::spawn(async move {
        if !grace.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(grace) => {}
            }
        }
        let removed = liveness.release_if_current(&id, stamp, || roster.remove_student(&id));
        if removed {
            info!(student_id = %id, "agent removed after grace period");
        } else {
            debug!(student_id = %id, "removal skipped, agent reconnected");
        }
    });
}
