//! TCP transport.

use std::io;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{info, instrument};

use super::{Connection, Endpoint, Listener};
use crate::error::Result;

/// Bind a TCP listener for the server's accept loop.
#[instrument]
pub async fn bind(address: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(address).await?;
    info!(address = %Listener::local_endpoint(&listener), "Listening");
    Ok(listener)
}

/// Open a TCP connection with Nagle disabled; every exchange is one small
/// write followed by a wait for the reply.
pub async fn connect<A: ToSocketAddrs>(address: A) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn endpoint(addr: io::Result<std::net::SocketAddr>) -> Endpoint {
    addr.map(Endpoint::Tcp).unwrap_or_default()
}

impl Connection for TcpStream {
    fn local_endpoint(&self) -> Endpoint {
        endpoint(self.local_addr())
    }

    fn peer_endpoint(&self) -> Endpoint {
        endpoint(self.peer_addr())
    }
}

impl Listener for TcpListener {
    type Conn = TcpStream;

    async fn accept(&self) -> io::Result<TcpStream> {
        let (stream, _) = TcpListener::accept(self).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn local_endpoint(&self) -> Endpoint {
        endpoint(self.local_addr())
    }
}
