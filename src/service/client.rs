//! # SBTP Client
//!
//! Owns at most one connection to an SBTP server and performs synchronous
//! request/response exchanges over it.
//!
//! Every blocking step gets its own fresh deadline: the dial, the request
//! write and the response read are each bounded by the configured timeout.
//! Errors are surfaced to the caller as-is; the client never reconnects or
//! retries on its own.
//!
//! ## Example
//! ```rust,no_run
//! use sbtp::service::client::Client;
//!
//! # async fn run() -> sbtp::error::Result<()> {
//! let client = Client::new();
//! client.connect("tcp", "127.0.0.1:9000").await?;
//! let response = client.request(b"Hello!".to_vec()).await?;
//! println!("{} bytes back", response.payload().len());
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument};

use crate::config::{ClientConfig, CLIENT_DEFAULT_TIMEOUT, MAX_PAYLOAD_SIZE};
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::transport::{dial, BoxedConnection, Endpoint, TransportKind};
use crate::utils::timeout::{deadline_after, with_deadline};

/// Client for issuing SBTP requests.
///
/// The client is `Send + Sync`: exchanges on a shared client are serialized
/// on the connection, and the timeout may be changed from any task while a
/// request is in flight (it applies from the next deadline on).
pub struct Client {
    conn: AsyncMutex<Option<BoxedConnection>>,
    timeout: Mutex<Duration>,
    max_payload_size: usize,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// A disconnected client with the default 5 second timeout.
    pub fn new() -> Self {
        Self::with_timeout(CLIENT_DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            conn: AsyncMutex::new(None),
            timeout: Mutex::new(timeout),
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }

    /// A disconnected client using the timeout and payload limit from
    /// `config`. See [`Client::connect_from_config`] to also dial.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            conn: AsyncMutex::new(None),
            timeout: Mutex::new(config.timeout),
            max_payload_size: config.max_payload_size,
        }
    }

    /// Build a client from `config` and dial `config.address` over
    /// `config.transport`.
    pub async fn connect_from_config(config: &ClientConfig) -> Result<Self> {
        let client = Self::from_config(config);
        client.connect(&config.transport, &config.address).await?;
        Ok(client)
    }

    /// Set the timeout used for dialing and for each read and write.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock().unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    pub fn timeout(&self) -> Duration {
        *self.timeout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Largest response payload this client will accept.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.max_payload_size = max_payload_size;
    }

    /// Drop any existing connection and dial `address` over `transport`
    /// (`"tcp"` or `"unix"`).
    pub async fn connect(&self, transport: &str, address: &str) -> Result<()> {
        let kind = transport.parse::<TransportKind>()?;
        self.connect_with(kind, address).await
    }

    #[instrument(skip(self))]
    pub async fn connect_with(&self, kind: TransportKind, address: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        close_connection(&mut conn).await?;

        *conn = Some(dial(kind, address, self.timeout()).await?);
        debug!("Connected");
        Ok(())
    }

    /// Close the current connection, if any. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        close_connection(&mut conn).await
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    pub async fn local_endpoint(&self) -> Option<Endpoint> {
        self.conn.lock().await.as_ref().map(|c| c.local_endpoint())
    }

    pub async fn peer_endpoint(&self) -> Option<Endpoint> {
        self.conn.lock().await.as_ref().map(|c| c.peer_endpoint())
    }

    /// Send `payload` as one request packet and wait for the response packet.
    ///
    /// Any failure aborts the exchange. The connection stays in place; after
    /// a timeout or protocol error its stream position is unknown, so callers
    /// normally reconnect before the next request.
    #[instrument(skip(self, payload))]
    pub async fn request<P: Into<Vec<u8>>>(&self, payload: P) -> Result<Packet> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(ProtocolError::NotConnected)?;

        let mut request = Packet::new(conn.local_endpoint());
        request.set_payload(payload);
        let mut response = Packet::new(conn.peer_endpoint());

        let deadline = deadline_after(self.timeout())?;
        let sent = with_deadline(
            Some(deadline),
            request.write_to_with_limit(conn, self.max_payload_size),
        )
        .await?;

        let deadline = deadline_after(self.timeout())?;
        let received = with_deadline(
            Some(deadline),
            response.read_from_with_limit(conn, self.max_payload_size),
        )
        .await?;

        debug!(sent, received, "Exchange complete");
        Ok(response)
    }
}

async fn close_connection(conn: &mut Option<BoxedConnection>) -> Result<()> {
    let Some(mut stream) = conn.take() else {
        return Ok(());
    };

    match stream.shutdown().await {
        Ok(()) => Ok(()),
        // The peer already tore the connection down
        Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
        Err(e) => {
            let err = ProtocolError::from(e);
            if err.is_disconnect() {
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}
