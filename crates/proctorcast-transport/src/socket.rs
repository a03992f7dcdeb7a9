//! TCP socket setup shared by the observer and the agents.
//!
//! Every stream is tuned for low-latency delivery (`TCP_NODELAY`) and carries
//! keep-alive probes so a silently dead peer is eventually noticed by the
//! kernel as well as by the session read timeout.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// TCP socket options applied to every stream.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keep-alive. Default: true.
    pub keepalive: bool,
    /// Idle time before the first keep-alive probe. Default: 5s.
    pub keepalive_idle: Duration,
    /// Interval between keep-alive probes. Default: 5s.
    pub keepalive_interval: Duration,
    /// Timeout for outgoing connection attempts. Default: 5s.
    pub connect_timeout: Duration,
    /// Set `SO_REUSEADDR` on listening sockets. Default: true except on Windows.
    pub reuse_addr: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive: true,
            keepalive_idle: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            reuse_addr: !cfg!(target_os = "windows"),
        }
    }
}

/// Apply socket configuration to a connected stream.
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive {
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

/// Connect to `addr` within the configured timeout and tune the stream.
pub async fn connect_tcp(addr: SocketAddr, config: &SocketConfig) -> Result<TcpStream> {
    let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
        Err(_) => {
            return Err(TransportError::Connect {
                addr,
                source: std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", config.connect_timeout),
                ),
            })
        }
    };

    configure_stream(&stream, config).map_err(|source| TransportError::Connect { addr, source })?;
    debug!(%addr, "connected");
    Ok(stream)
}

/// Bind a listening socket on `addr`.
pub async fn bind_tcp(addr: SocketAddr, config: &SocketConfig) -> Result<TcpListener> {
    let bind_err = |source| TransportError::Bind { addr, source };

    let domain = if addr.is_ipv6() {
        socket2::Domain::IPV6
    } else {
        socket2::Domain::IPV4
    };
    let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
        .map_err(bind_err)?;

    if config.reuse_addr {
        socket.set_reuse_address(true).map_err(bind_err)?;
    }
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(128).map_err(bind_err)?;

    let std_listener: std::net::TcpListener = socket.into();
    let listener = TcpListener::from_std(std_listener).map_err(bind_err)?;

    info!(addr = %listener.local_addr().unwrap_or(addr), "listening for agents");
    Ok(listener)
}
