//! Local IPC transport.
//!
//! On Unix systems this uses Unix Domain Sockets. Other targets have no local
//! transport and report `UnsupportedTransport` when asked to dial one.

#[cfg(unix)]
use std::io;
#[cfg(unix)]
use std::path::Path;

use tokio::time::Instant;
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
#[cfg(unix)]
use tracing::{debug, info, instrument};

use super::BoxedConnection;
#[cfg(unix)]
use super::{Connection, Endpoint, Listener};
#[cfg(not(unix))]
use crate::error::ProtocolError;
use crate::error::Result;
#[cfg(unix)]
use crate::utils::timeout::with_deadline;

/// Bind a Unix domain socket listener, replacing a stale socket file.
#[cfg(unix)]
#[instrument(skip(path), fields(socket_path = %path.as_ref().display()))]
pub async fn bind<P: AsRef<Path>>(path: P) -> Result<UnixListener> {
    if path.as_ref().exists() {
        debug!("Removing stale socket file");
        tokio::fs::remove_file(&path).await.ok();
    }

    let listener = UnixListener::bind(&path)?;
    info!("Listening on unix socket");
    Ok(listener)
}

#[cfg(unix)]
pub(crate) async fn connect_boxed(path: &str, deadline: Instant) -> Result<BoxedConnection> {
    let stream = with_deadline(Some(deadline), UnixStream::connect(path)).await?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
pub(crate) async fn connect_boxed(_path: &str, _deadline: Instant) -> Result<BoxedConnection> {
    Err(ProtocolError::UnsupportedTransport("unix".to_string()))
}

#[cfg(unix)]
fn endpoint(addr: io::Result<tokio::net::unix::SocketAddr>) -> Endpoint {
    match addr {
        Ok(addr) => Endpoint::Unix(addr.as_pathname().map(Path::to_path_buf)),
        Err(_) => Endpoint::Unknown,
    }
}

#[cfg(unix)]
impl Connection for UnixStream {
    fn local_endpoint(&self) -> Endpoint {
        endpoint(self.local_addr())
    }

    fn peer_endpoint(&self) -> Endpoint {
        endpoint(self.peer_addr())
    }
}

#[cfg(unix)]
impl Listener for UnixListener {
    type Conn = UnixStream;

    async fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _) = UnixListener::accept(self).await?;
        Ok(stream)
    }

    fn local_endpoint(&self) -> Endpoint {
        endpoint(self.local_addr())
    }
}
