//! Agent side: discover, connect, identify, stream, and retry.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use proctorcast_frame::{FrameConfig, FrameWriter, MESSAGE, NAME, PICTURE};
use proctorcast_transport::{connect_tcp, discover_server, DiscoveryConfig, SocketConfig, TransportError};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::collab::ScreenCapture;
use crate::error::{PeerError, Result};
use crate::identity::format_identity;

/// Agent connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// Not started, or stopped.
    #[default]
    Idle,
    /// Waiting for an observer beacon.
    Discovering,
    /// Opening the TCP stream.
    Connecting,
    /// Identified and sending images.
    Streaming,
    /// Last attempt failed; waiting out the backoff.
    Disconnected,
}

/// Observable agent status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientStatus {
    pub state: ClientState,
    /// Cached observer address. Cleared when a connect fails.
    pub server: Option<IpAddr>,
    /// When the last image frame was written.
    pub last_sent: Option<SystemTime>,
    pub frames_sent: u64,
    pub last_error: Option<String>,
}

/// Notification pushed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged(ClientState),
    /// A discovery, connect, or stream attempt failed.
    Error(String),
}

type EventCallback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Agent settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub student_id: String,
    pub student_name: String,
    /// Session port. Also used for discovery.
    pub port: u16,
    /// Known observer address. Skips the first discovery; dropped like a
    /// discovered address if connecting to it fails.
    pub server: Option<IpAddr>,
    /// Delay between image frames. Default: 500ms.
    pub frame_interval: Duration,
    /// First retry delay. Default: 1s.
    pub backoff_initial: Duration,
    /// Retry delay cap. Default: 8s.
    pub backoff_max: Duration,
    pub discovery: DiscoveryConfig,
    pub socket: SocketConfig,
    pub frame: FrameConfig,
}

impl ClientConfig {
    pub fn new(student_id: impl Into<String>, student_name: impl Into<String>, port: u16) -> Self {
        Self {
            student_id: student_id.into(),
            student_name: student_name.into(),
            port,
            server: None,
            frame_interval: Duration::from_millis(500),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(8),
            discovery: DiscoveryConfig::new(port),
            socket: SocketConfig::default(),
            frame: FrameConfig::default(),
        }
    }

    pub fn with_server(mut self, server: IpAddr) -> Self {
        self.server = Some(server);
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max;
        self
    }
}

/// A configured, not yet started agent.
pub struct Client {
    config: ClientConfig,
    capture: Box<dyn ScreenCapture>,
    on_event: Option<EventCallback>,
}

impl Client {
    pub fn new(config: ClientConfig, capture: impl ScreenCapture) -> Self {
        Self {
            config,
            capture: Box::new(capture),
            on_event: None,
        }
    }

    /// Called from the client task on every state transition and failure.
    pub fn on_event(mut self, callback: impl Fn(&ClientEvent) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(callback));
        self
    }

    /// Validate the identity and spawn the connection loop.
    pub fn start(self) -> Result<ClientHandle> {
        let identity = format_identity(&self.config.student_id, &self.config.student_name)?;

        let mut config = self.config;
        config.discovery.port = config.port;

        let initial = ClientStatus {
            server: config.server,
            ..ClientStatus::default()
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = ClientTask {
            backoff: Backoff::new(config.backoff_initial, config.backoff_max),
            server: config.server,
            identity,
            config,
            capture: Arc::new(Mutex::new(self.capture)),
            status: status_tx,
            on_event: self.on_event,
            messages: message_rx,
            cancel: cancel.clone(),
        };

        Ok(ClientHandle {
            cancel,
            status: status_rx,
            messages: message_tx,
            task: tokio::spawn(task.run()),
        })
    }
}

/// Handle to a running agent.
///
/// Dropping the handle leaves the agent running; call
/// [`ClientHandle::stop`] or [`ClientHandle::shutdown`].
pub struct ClientHandle {
    cancel: CancellationToken,
    status: watch::Receiver<ClientStatus>,
    messages: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ClientState {
        self.status.borrow().state
    }

    pub fn last_sent(&self) -> Option<SystemTime> {
        self.status.borrow().last_sent
    }

    /// Receiver that is notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    /// Queue a text message for the observer. Only accepted while streaming;
    /// empty text is ignored.
    pub fn send_message(&self, text: impl Into<String>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PeerError::Stopped);
        }
        if self.state() != ClientState::Streaming {
            return Err(PeerError::NotConnected);
        }
        self.messages.send(text.into()).map_err(|_| PeerError::Stopped)
    }

    /// Stop the loop and close any open stream. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(err) = self.task.await {
            warn!(error = %err, "client task failed");
        }
    }
}

struct ClientTask {
    config: ClientConfig,
    identity: String,
    capture: Arc<Mutex<Box<dyn ScreenCapture>>>,
    status: watch::Sender<ClientStatus>,
    on_event: Option<EventCallback>,
    messages: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    backoff: Backoff,
    server: Option<IpAddr>,
}

impl ClientTask {
    async fn run(mut self) {
        info!(student_id = %self.config.student_id, port = self.config.port, "agent started");

        while !self.cancel.is_cancelled() {
            let ip = match self.server {
                Some(ip) => ip,
                None => match self.discover().await {
                    Ok(ip) => ip,
                    Err(PeerError::Stopped) => break,
                    Err(err) => {
                        self.fail(&err);
                        if !self.pause().await {
                            break;
                        }
                        continue;
                    }
                },
            };

            let stream = match self.connect(ip).await {
                Ok(stream) => stream,
                Err(PeerError::Stopped) => break,
                Err(err) => {
                    self.server = None;
                    self.update(|status| status.server = None);
                    self.fail(&err);
                    if !self.pause().await {
                        break;
                    }
                    continue;
                }
            };

            let err = match self.stream(stream).await {
                Ok(never) => match never {},
                Err(err) => err,
            };
            if matches!(err, PeerError::Stopped) {
                break;
            }
            self.fail(&err);
            if !self.pause().await {
                break;
            }
        }

        self.set_state(ClientState::Idle);
        info!(student_id = %self.config.student_id, "agent stopped");
    }

    async fn discover(&mut self) -> Result<IpAddr> {
        self.set_state(ClientState::Discovering);
        match discover_server(&self.config.discovery, &self.cancel).await {
            Ok(ip) => {
                info!(server = %ip, "observer discovered");
                self.server = Some(ip);
                self.update(|status| status.server = Some(ip));
                Ok(ip)
            }
            Err(TransportError::Shutdown) => Err(PeerError::Stopped),
            Err(err) => Err(err.into()),
        }
    }

    async fn connect(&mut self, ip: IpAddr) -> Result<TcpStream> {
        self.set_state(ClientState::Connecting);
        let addr = SocketAddr::new(ip, self.config.port);
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PeerError::Stopped),
            connected = connect_tcp(addr, &self.config.socket) => connected.map_err(PeerError::from),
        }
    }

    /// Identify, then send images until something fails. Only returns with
    /// an error; [`PeerError::Stopped`] means the client was stopped.
    async fn stream(&mut self, stream: TcpStream) -> Result<Infallible> {
        let mut writer = FrameWriter::with_config(stream, self.config.frame.clone());
        send_frame(&mut writer, &self.cancel, NAME, self.identity.as_bytes()).await?;

        self.backoff.reset();
        self.set_state(ClientState::Streaming);
        info!(student_id = %self.config.student_id, "streaming to observer");

        loop {
            let shot = self.capture_once().await?;
            send_frame(&mut writer, &self.cancel, PICTURE, &shot).await?;
            self.update(|status| {
                status.last_sent = Some(SystemTime::now());
                status.frames_sent += 1;
            });

            let next_capture = Instant::now() + self.config.frame_interval;
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(PeerError::Stopped),
                    _ = tokio::time::sleep_until(next_capture) => break,
                    Some(text) = self.messages.recv() => {
                        if !text.is_empty() {
                            send_frame(&mut writer, &self.cancel, MESSAGE, text.as_bytes()).await?;
                            debug!(len = text.len(), "message sent");
                        }
                    }
                }
            }
        }
    }

    async fn capture_once(&self) -> Result<Bytes> {
        let capture = Arc::clone(&self.capture);
        let job = tokio::task::spawn_blocking(move || {
            capture
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .capture()
        });
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PeerError::Stopped),
            joined = job => joined.map_err(|err| PeerError::Capture(err.to_string()))?,
        }
    }

    /// Wait out the next backoff delay. False if stopped meanwhile.
    async fn pause(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        debug!(?delay, "retrying after backoff");
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn fail(&self, err: &PeerError) {
        warn!(error = %err, "agent connection failed");
        let message = err.to_string();
        self.update(|status| status.last_error = Some(message.clone()));
        self.emit(ClientEvent::Error(message));
        self.set_state(ClientState::Disconnected);
    }

    fn set_state(&self, state: ClientState) {
        debug!(?state, "agent state");
        self.update(|status| {
            status.state = state;
            if state == ClientState::Streaming {
                status.last_error = None;
            }
        });
        self.emit(ClientEvent::StateChanged(state));
    }

    fn update(&self, apply: impl FnOnce(&mut ClientStatus)) {
        self.status.send_modify(apply);
    }

    fn emit(&self, event: ClientEvent) {
        if let Some(callback) = &self.on_event {
            callback(&event);
        }
    }
}

async fn send_frame(
    writer: &mut FrameWriter<TcpStream>,
    cancel: &CancellationToken,
    tag: u16,
    payload: &[u8],
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PeerError::Stopped),
        sent = writer.send(tag, payload) => sent.map_err(PeerError::from),
    }
}
