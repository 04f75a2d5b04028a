//! # Transport Layer
//!
//! Byte-stream transports that SBTP packets travel over.
//!
//! The client and server only rely on two seams:
//! - [`Connection`]: an ordered, bidirectional byte stream that can name its
//!   own and its peer's endpoint
//! - [`Listener`]: something that hands out new connections
//!
//! ## Implementations
//! - **TCP**: `tokio::net::TcpStream` / `TcpListener` (see [`tcp`])
//! - **Unix domain sockets**: `UnixStream` / `UnixListener` on Unix targets
//!   (see [`local`])
//! - **In-memory**: `tokio::io::DuplexStream`, for tests and embedding

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tracing::{debug, instrument};

use crate::error::{ProtocolError, Result};
use crate::utils::timeout::{deadline_after, with_deadline};

pub mod local;
pub mod tcp;

/// Informational address of one side of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Endpoint {
    #[default]
    Unknown,
    Tcp(SocketAddr),
    /// Unix socket path; unnamed sockets (typical for clients) carry `None`.
    Unix(Option<PathBuf>),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unknown => write!(f, "unknown"),
            Endpoint::Tcp(addr) => write!(f, "{addr}"),
            Endpoint::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            Endpoint::Unix(None) => write!(f, "unix:(unnamed)"),
        }
    }
}

/// Transport named by the protocol half of a `(protocol, address)` dial pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Unix,
}

impl FromStr for TransportKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" | "tcp4" | "tcp6" => Ok(TransportKind::Tcp),
            "unix" => Ok(TransportKind::Unix),
            other => Err(ProtocolError::UnsupportedTransport(other.to_string())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Unix => write!(f, "unix"),
        }
    }
}

/// A reliable, ordered, bidirectional byte stream.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    fn local_endpoint(&self) -> Endpoint;
    fn peer_endpoint(&self) -> Endpoint;
}

pub type BoxedConnection = Box<dyn Connection>;

/// In-memory pipe from `tokio::io::duplex`; neither end has an address.
impl Connection for DuplexStream {
    fn local_endpoint(&self) -> Endpoint {
        Endpoint::Unknown
    }

    fn peer_endpoint(&self) -> Endpoint {
        Endpoint::Unknown
    }
}

/// A source of inbound connections for the server's accept loop.
///
/// The accept loop bounds every `accept` call with its own deadline, so
/// implementations only need plain accept semantics.
pub trait Listener: Send + Sync {
    type Conn: Connection;

    fn accept(&self) -> impl Future<Output = io::Result<Self::Conn>> + Send;

    fn local_endpoint(&self) -> Endpoint;
}

/// Dial `address` over `kind`, giving up once `timeout` has elapsed.
#[instrument(skip(timeout), fields(timeout_ms = timeout.as_millis() as u64))]
pub async fn dial(kind: TransportKind, address: &str, timeout: Duration) -> Result<BoxedConnection> {
    let deadline = deadline_after(timeout)?;

    let conn: BoxedConnection = match kind {
        TransportKind::Tcp => Box::new(with_deadline(Some(deadline), tcp::connect(address)).await?),
        TransportKind::Unix => local::connect_boxed(address, deadline).await?,
    };

    debug!(local = %conn.local_endpoint(), peer = %conn.peer_endpoint(), "Dialed");
    Ok(conn)
}
