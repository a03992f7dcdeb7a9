use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proctorcast_frame::FrameConfig;
use proctorcast_roster::Roster;
use proctorcast_transport::{bind_tcp, configure_stream, Beacon, DiscoveryConfig, SocketConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collab::ImageDecoder;
use crate::error::Result;
use crate::liveness::LivenessTracker;
use crate::session::{run_session, SessionContext};

/// Default delay before a disconnected agent is dropped from the roster.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(50);

/// Observer settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Session port, shared by the TCP listener and the discovery beacon.
    pub port: u16,
    pub bind_ip: IpAddr,
    /// Zero removes disconnected agents immediately.
    pub grace_period: Duration,
    pub frame: FrameConfig,
    pub socket: SocketConfig,
    /// Beacon settings. The port is overwritten with the bound TCP port.
    pub discovery: DiscoveryConfig,
    /// Send discovery beacons while running.
    pub beacon: bool,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            grace_period: DEFAULT_GRACE_PERIOD,
            frame: FrameConfig::default(),
            socket: SocketConfig::default(),
            discovery: DiscoveryConfig::new(port),
            beacon: true,
        }
    }

    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_beacon(mut self, enabled: bool) -> Self {
        self.beacon = enabled;
        self
    }

    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }
}

/// A bound, not yet running observer.
pub struct Server {
    listener: TcpListener,
    beacon: Option<Beacon>,
    local_addr: SocketAddr,
    socket_config: SocketConfig,
    ctx: SessionContext,
}

impl Server {
    /// Bind the session port and, if enabled, the beacon socket.
    pub async fn bind(
        config: ServerConfig,
        roster: Arc<dyn Roster>,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Result<Self> {
        let addr = SocketAddr::new(config.bind_ip, config.port);
        let listener = bind_tcp(addr, &config.socket).await?;
        let local_addr = listener
            .local_addr()
            .map_err(proctorcast_transport::TransportError::Io)?;

        let beacon = if config.beacon {
            let mut discovery = config.discovery.clone();
            discovery.port = local_addr.port();
            Some(Beacon::bind(&discovery).await?)
        } else {
            None
        };

        let ctx = SessionContext::new(roster, decoder)
            .with_grace_period(config.grace_period)
            .with_frame_config(config.frame.clone());

        Ok(Self {
            listener,
            beacon,
            local_addr,
            socket_config: config.socket,
            ctx,
        })
    }

    /// Bind and start in one step.
    pub async fn start(
        config: ServerConfig,
        roster: Arc<dyn Roster>,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Result<ServerHandle> {
        Ok(Self::bind(config, roster, decoder).await?.run())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the accept loop and beacon. Must be called inside a tokio runtime.
    pub fn run(self) -> ServerHandle {
        let cancel = self.ctx.cancel.clone();
        let liveness = Arc::clone(&self.ctx.liveness);
        let sessions = Arc::new(AtomicUsize::new(0));

        let beacon_task = self
            .beacon
            .map(|beacon| tokio::spawn(beacon.run(cancel.clone())));

        info!(addr = %self.local_addr, "observer listening");
        let accept_task = tokio::spawn(accept_loop(
            self.listener,
            self.socket_config,
            self.ctx,
            Arc::clone(&sessions),
        ));

        ServerHandle {
            cancel,
            local_addr: self.local_addr,
            liveness,
            sessions,
            accept_task,
            beacon_task,
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    socket_config: SocketConfig,
    ctx: SessionContext,
    sessions: Arc<AtomicUsize>,
) {
    loop {
        let accepted = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "accept failed");
                if !pause_after_accept_error(&ctx.cancel, ACCEPT_ERROR_DELAY).await {
                    break;
                }
                continue;
            }
        };

        if let Err(err) = configure_stream(&stream, &socket_config) {
            debug!(%peer, error = %err, "socket options not applied");
        }
        debug!(%peer, "agent connected");

        let ctx = ctx.clone();
        let sessions = Arc::clone(&sessions);
        sessions.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            let summary = run_session(stream, peer, &ctx).await;
            sessions.fetch_sub(1, Ordering::Relaxed);
            debug!(
                %peer,
                student_id = summary.student_id.as_deref().unwrap_or("-"),
                frames = summary.frames,
                images = summary.images,
                "session finished"
            );
        });
    }
    info!("observer stopped accepting");
}

/// Wait out `delay` after a failed accept. False if the server stopped meanwhile.
async fn pause_after_accept_error(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Handle to a running observer.
///
/// Dropping the handle does not stop the observer; call [`ServerHandle::stop`]
/// or [`ServerHandle::shutdown`].
pub struct ServerHandle {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    liveness: Arc<LivenessTracker>,
    sessions: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
    beacon_task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting, close every session, halt the beacon, and cancel
    /// pending grace removals. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!(addr = %self.local_addr, "stopping observer");
        }
        self.cancel.cancel();
        self.liveness.clear();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.accept_task.is_finished()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sessions currently open.
    pub fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Token cancelled when the observer stops.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop and wait for the accept loop and beacon to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(err) = self.accept_task.await {
            warn!(error = %err, "accept task failed");
        }
        if let Some(beacon) = self.beacon_task {
            if let Err(err) = beacon.await {
                warn!(error = %err, "beacon task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use image::DynamicImage;
    use proctorcast_frame::{FrameWriter, NAME, PICTURE};
    use proctorcast_roster::{Bitmap, StudentRegistry};
    use proctorcast_transport::discover_server;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    use super::*;

    fn decoder() -> Arc<dyn ImageDecoder> {
        Arc::new(|_: &[u8]| -> Result<Bitmap> { Ok(Arc::new(DynamicImage::new_rgb8(1, 1))) })
    }

    fn loopback_config() -> ServerConfig {
        ServerConfig::new(0)
            .with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_beacon(false)
            .with_grace_period(Duration::from_millis(50))
    }

    async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn accepts_agents_concurrently() {
        let registry = Arc::new(StudentRegistry::new());
        let server = Server::start(loopback_config(), registry.clone(), decoder())
            .await
            .expect("server should start");
        assert!(server.is_running());

        let mut agents = Vec::new();
        for (id, name) in [("A1", "Ada"), ("B2", "Grace"), ("C3", "Edsger")] {
            let stream = TcpStream::connect(server.local_addr()).await.unwrap();
            let mut writer = FrameWriter::new(stream);
            writer.send(NAME, format!("{id}###{name}").as_bytes()).await.unwrap();
            writer.send(PICTURE, b"png").await.unwrap();
            agents.push(writer);
        }

        wait_until("three agents", || registry.count() == 3).await;
        wait_until("images", || {
            registry.get_sorted().iter().all(|s| s.image().is_some())
        })
        .await;
        assert_eq!(server.active_sessions(), 3);

        drop(agents);
        wait_until("grace removal", || registry.count() == 0).await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn stop_closes_sessions_and_is_idempotent() {
        let registry = Arc::new(StudentRegistry::new());
        let config = loopback_config().with_grace_period(Duration::ZERO);
        let server = Server::start(config, registry.clone(), decoder())
            .await
            .unwrap();

        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut writer = FrameWriter::new(stream);
        writer.send(NAME, b"A1###Ada").await.unwrap();
        wait_until("agent", || registry.exists("A1")).await;

        server.stop();
        server.stop();
        assert!(!server.is_running());

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(3), writer.get_mut().read(&mut buf))
            .await
            .expect("session should close its socket on stop");
        assert!(matches!(read, Ok(0) | Err(_)));

        // Stopped sessions do not schedule removal; the owner clears the roster.
        assert!(registry.exists("A1"));

        let addr = server.local_addr();
        server.shutdown().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn accept_error_pause_ends_on_stop() {
        let cancel = CancellationToken::new();
        assert!(pause_after_accept_error(&cancel, Duration::from_millis(1)).await);

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });
        let resumed = tokio::time::timeout(
            Duration::from_secs(3),
            pause_after_accept_error(&cancel, Duration::from_secs(60)),
        )
        .await
        .expect("stop should cut the pause short");
        assert!(!resumed);
    }

    #[tokio::test]
    async fn beacon_advertises_bound_port() {
        let registry = Arc::new(StudentRegistry::new());
        let mut config = loopback_config().with_beacon(true);
        config.discovery.target = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.discovery.interval = Duration::from_millis(20);

        let server = Server::start(config, registry, decoder()).await.unwrap();

        let mut listen = DiscoveryConfig::new(server.local_addr().port());
        listen.listen_ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        listen.listen_timeout = Duration::from_secs(3);
        let found = discover_server(&listen, &CancellationToken::new())
            .await
            .expect("beacon should be heard on loopback");
        assert_eq!(found, IpAddr::V4(Ipv4Addr::LOCALHOST));

        server.shutdown().await;
    }
}
