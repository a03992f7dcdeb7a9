//! UDP broadcast discovery.
//!
//! The observer periodically broadcasts a fixed beacon on the session port.
//! Agents listen on that port and take the sender address of the first
//! datagram whose payload is exactly the beacon. Anything else is ignored.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};

/// Literal beacon payload.
pub const BEACON_PAYLOAD: &[u8] = b"server";

const RECV_BUFFER_SIZE: usize = 1024;

/// Beacon and listener settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Session port ("room number"). Shared with the TCP stream.
    pub port: u16,
    /// Destination of beacon datagrams. Default: limited broadcast.
    pub target: IpAddr,
    /// Local address the agent listens on. Default: unspecified.
    pub listen_ip: IpAddr,
    /// Delay between successful beacon sends. Default: 1s.
    pub interval: Duration,
    /// Delay before retrying a failed beacon send. Default: 1s.
    pub retry_delay: Duration,
    /// How long an agent waits for a beacon. Default: 10s.
    pub listen_timeout: Duration,
}

impl DiscoveryConfig {
    /// Default discovery settings for a session port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            target: IpAddr::V4(Ipv4Addr::BROADCAST),
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
            listen_timeout: Duration::from_secs(10),
        }
    }

    fn target_addr(&self) -> SocketAddr {
        SocketAddr::new(self.target, self.port)
    }

    fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip, self.port)
    }
}

/// Observer-side beacon sender.
pub struct Beacon {
    socket: UdpSocket,
    target: SocketAddr,
    interval: Duration,
    retry_delay: Duration,
}

impl Beacon {
    /// Open the sending socket. The beacon itself is sent from an ephemeral port.
    pub async fn bind(config: &DiscoveryConfig) -> Result<Self> {
        let local = match config.target {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| TransportError::Bind {
                addr: local,
                source,
            })?;
        socket.set_broadcast(true)?;

        Ok(Self {
            socket,
            target: config.target_addr(),
            interval: config.interval,
            retry_delay: config.retry_delay,
        })
    }

    /// Beacon destination.
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send beacons until `cancel` fires.
    ///
    /// A failed send never ends the loop; it is retried after `retry_delay`.
    pub async fn run(self, cancel: CancellationToken) {
        info!(destination = %self.target, "discovery beacon started");
        let mut sent = 0u64;

        loop {
            let delay = match self.socket.send_to(BEACON_PAYLOAD, self.target).await {
                Ok(_) => {
                    sent = sent.saturating_add(1);
                    debug!(sent, "beacon sent");
                    self.interval
                }
                Err(err) => {
                    warn!(error = %err, destination = %self.target, "beacon send failed");
                    self.retry_delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(sent, "discovery beacon stopped");
    }
}

/// Wait for a beacon and return the observer's address.
///
/// Returns [`TransportError::DiscoveryTimeout`] when no matching beacon
/// arrives within `listen_timeout`, and [`TransportError::Shutdown`] when
/// `cancel` fires first.
pub async fn discover_server(config: &DiscoveryConfig, cancel: &CancellationToken) -> Result<IpAddr> {
    let socket = bind_listener(config.listen_addr())?;
    let deadline = Instant::now() + config.listen_timeout;
    let mut buf = [0u8; RECV_BUFFER_SIZE];

    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Shutdown),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(TransportError::DiscoveryTimeout(config.listen_timeout));
            }
            received = socket.recv_from(&mut buf) => received?,
        };

        if &buf[..len] == BEACON_PAYLOAD {
            info!(server = %from.ip(), "discovered observer");
            return Ok(from.ip());
        }
        debug!(%from, len, "ignoring non-beacon datagram");
    }
}

fn bind_listener(addr: SocketAddr) -> Result<UdpSocket> {
    let bind_err = |source| TransportError::Bind { addr, source };

    let domain = if addr.is_ipv6() {
        socket2::Domain::IPV6
    } else {
        socket2::Domain::IPV4
    };
    let socket = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
        .map_err(bind_err)?;

    // Several agents on one host may listen on the same port.
    socket.set_reuse_address(true).map_err(bind_err)?;
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    socket.set_reuse_port(true).map_err(bind_err)?;

    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(bind_err)
}
