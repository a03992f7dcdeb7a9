use std::net::SocketAddr;
use std::time::Duration;

/// Errors that can occur in socket and discovery operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on a socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No beacon arrived within the listen window.
    #[error("no discovery beacon received within {0:?}")]
    DiscoveryTimeout(Duration),

    /// The operation was cancelled by a stop signal.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
