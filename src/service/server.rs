//! # SBTP Server
//!
//! Accepts connections on a caller-provided [`Listener`] and serves each one
//! on its own task: decode a request, run the handler chain, write the
//! response, repeat until the peer disconnects, misbehaves or goes quiet for
//! longer than the timeout.
//!
//! ## Lifecycle
//! `Idle --start--> Running --stop--> StopRequested --> Stopped`
//!
//! `start` occupies the calling task until the server is stopped, so it is
//! usually spawned on an `Arc<Server>`:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sbtp::service::server::Server;
//! use sbtp::transport::tcp;
//!
//! # async fn run() -> sbtp::error::Result<()> {
//! let mut server = Server::new();
//! server.add_handler(|req, resp| {
//!     resp.set_payload(req.payload().to_vec());
//!     Ok(())
//! });
//!
//! let server = Arc::new(server);
//! let listener = tcp::bind("127.0.0.1:9000").await?;
//! let running = tokio::spawn({
//!     let server = server.clone();
//!     async move { server.start(listener).await }
//! });
//!
//! // ...
//! server.stop().await;
//! running.await.ok();
//! # Ok(())
//! # }
//! ```
//!
//! ## Limitations
//! `stop` only ends the accept loop. Connections that were already accepted
//! keep being served until they close or time out on their own.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{
    ServerConfig, MAX_PAYLOAD_SIZE, SERVER_DEFAULT_TIMEOUT, SERVER_MAX_TIMEOUT, SERVER_MIN_TIMEOUT,
    STOP_POLL_INTERVAL,
};
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::handler::HandlerChain;
use crate::transport::{tcp, Connection, Listener};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::{deadline_after, with_deadline};

/// Where a server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Idle = 0,
    Running = 1,
    StopRequested = 2,
    Stopped = 3,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerState::Running,
            2 => ServerState::StopRequested,
            3 => ServerState::Stopped,
            _ => ServerState::Idle,
        }
    }
}

pub struct Server {
    handlers: HandlerChain,
    timeout: Duration,
    max_payload_size: usize,
    state: AtomicU8,
    stop_tx: mpsc::Sender<()>,
    stop_rx: Mutex<mpsc::Receiver<()>>,
    stopped_tx: mpsc::Sender<()>,
    stopped_rx: Mutex<mpsc::Receiver<()>>,
    metrics: Arc<Metrics>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// An idle server with no handlers and the default 30 second timeout.
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (stopped_tx, stopped_rx) = mpsc::channel(1);

        Self {
            handlers: HandlerChain::new(),
            timeout: SERVER_DEFAULT_TIMEOUT,
            max_payload_size: MAX_PAYLOAD_SIZE,
            state: AtomicU8::new(ServerState::Idle as u8),
            stop_tx,
            stop_rx: Mutex::new(stop_rx),
            stopped_tx,
            stopped_rx: Mutex::new(stopped_rx),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// An idle server using the timeout and payload limit from `config`.
    ///
    /// The listen address is used by [`Server::bind`].
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut server = Self::new();
        server.set_timeout(config.timeout);
        server.max_payload_size = config.max_payload_size;
        server
    }

    /// Bind a TCP listener on `config.address` for [`Server::start`].
    pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
        tcp::bind(&config.address).await
    }

    /// Set the timeout bounding every accept, read and write.
    ///
    /// Values outside 10ms..=1h are clamped into that range, so no
    /// operation runs without a deadline.
    pub fn set_timeout(&mut self, timeout: Duration) {
        let clamped = timeout.clamp(SERVER_MIN_TIMEOUT, SERVER_MAX_TIMEOUT);
        if clamped != timeout {
            warn!(
                requested_ms = timeout.as_millis() as u64,
                timeout_ms = clamped.as_millis() as u64,
                "Server timeout out of range, clamped"
            );
        }
        self.timeout = clamped;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Largest request payload the server will read.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.max_payload_size = max_payload_size;
    }

    /// Append a handler to the chain run for every request.
    ///
    /// Handlers run in the order they were added. Registration needs
    /// `&mut self`, so the chain is fixed once the server is shared to run.
    pub fn add_handler<F>(&mut self, handler: F)
    where
        F: Fn(&Packet, &mut Packet) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: ServerState, to: ServerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Run the accept loop on `listener` until [`Server::stop`] is called.
    ///
    /// Each accepted connection is served on its own task. Returns
    /// `AlreadyRunning` if another `start` on this server is still active.
    #[instrument(skip_all, fields(local = %listener.local_endpoint()))]
    pub async fn start<L: Listener>(&self, listener: L) -> Result<()> {
        let mut stop_rx = self
            .stop_rx
            .try_lock()
            .map_err(|_| ProtocolError::AlreadyRunning)?;

        if let Ok(mut stopped_rx) = self.stopped_rx.try_lock() {
            // Left over from a stop that gave up waiting on a previous run
            while stopped_rx.try_recv().is_ok() {}
        }

        let current = self.state();
        if current != ServerState::StopRequested {
            // A stop request already honoured by a previous run
            while stop_rx.try_recv().is_ok() {}
            // Fails only if a stop arrived meanwhile; the loop below sees it
            self.transition(current, ServerState::Running);
        }
        let chain = Arc::new(self.handlers.clone());
        info!(handlers = chain.len(), "Server started");

        let mut accept_deadline: Option<Instant> = None;
        loop {
            if self.state() == ServerState::StopRequested {
                break;
            }
            accept_deadline = refresh_deadline(self.timeout, accept_deadline, "accept");

            tokio::select! {
                biased;

                _ = stop_rx.recv() => break,

                accepted = with_deadline(accept_deadline, listener.accept()) => match accepted {
                    Ok(conn) => {
                        let chain = chain.clone();
                        let metrics = self.metrics.clone();
                        let (timeout, max_payload_size) = (self.timeout, self.max_payload_size);
                        tokio::spawn(async move {
                            serve_connection(conn, chain, timeout, max_payload_size, metrics).await;
                        });
                    }
                    Err(ProtocolError::Timeout) => {
                        trace!("Accept deadline reached");
                    }
                    Err(e) => {
                        self.metrics.connection_error();
                        warn!(error = %e, "Error accepting connection");
                    }
                }
            }
        }

        self.set_state(ServerState::Stopped);
        let _ = self.stopped_tx.try_send(());
        info!("Server stopped");
        Ok(())
    }

    /// Ask the accept loop to exit and wait until it has.
    ///
    /// Does not wait for connections that are already being served. On a
    /// server that has already stopped this returns immediately; on one that
    /// has not been started yet it waits for `start` to pick up the request.
    pub async fn stop(&self) {
        loop {
            match self.state() {
                ServerState::Stopped => return,
                // Another caller already posted the request
                ServerState::StopRequested => break,
                current => {
                    if self.transition(current, ServerState::StopRequested) {
                        let _ = self.stop_tx.try_send(());
                        break;
                    }
                }
            }
        }

        let mut stopped_rx = self.stopped_rx.lock().await;
        loop {
            match tokio::time::timeout(STOP_POLL_INTERVAL, stopped_rx.recv()).await {
                Ok(_) => break,
                // Another caller of stop may have taken the confirmation
                Err(_) if self.state() == ServerState::Stopped => break,
                Err(_) => debug!("Waiting for accept loop to exit"),
            }
        }
    }
}

/// A new deadline `timeout` from now, or `previous` when one can't be set.
fn refresh_deadline(timeout: Duration, previous: Option<Instant>, operation: &str) -> Option<Instant> {
    match deadline_after(timeout) {
        Ok(deadline) => Some(deadline),
        Err(e) => {
            warn!(operation, error = %e, "Error setting deadline");
            previous
        }
    }
}

/// Serve one connection until it ends. Failures are only logged.
#[instrument(skip_all, fields(peer = %conn.peer_endpoint()))]
async fn serve_connection<C: Connection>(
    mut conn: C,
    chain: Arc<HandlerChain>,
    timeout: Duration,
    max_payload_size: usize,
    metrics: Arc<Metrics>,
) {
    metrics.connection_established();
    info!("Accepted connection");

    let mut deadline: Option<Instant> = None;
    loop {
        let mut request = Packet::new(conn.peer_endpoint());
        let mut response = Packet::new(conn.local_endpoint());

        deadline = refresh_deadline(timeout, deadline, "request");
        match with_deadline(deadline, request.read_from_with_limit(&mut conn, max_payload_size)).await {
            Ok(bytes) => {
                metrics.request_received(bytes);
                debug!(bytes, "Request received");
            }
            Err(e) if e.is_disconnect() => {
                debug!("Peer disconnected");
                break;
            }
            Err(ProtocolError::Timeout) => {
                info!("Connection idle past timeout");
                break;
            }
            Err(e) => {
                if e.is_wire_violation() {
                    metrics.protocol_error();
                } else {
                    metrics.connection_error();
                }
                error!(error = %e, "Error reading request");
                break;
            }
        }

        metrics.handler_errors(chain.run(&request, &mut response));

        deadline = refresh_deadline(timeout, deadline, "response");
        match with_deadline(deadline, response.write_to_with_limit(&mut conn, max_payload_size)).await {
            Ok(bytes) => {
                metrics.response_sent(bytes);
                debug!(bytes, "Response sent");
            }
            Err(e) if e.is_disconnect() => {
                debug!("Peer disconnected before response");
                break;
            }
            Err(e) => {
                metrics.connection_error();
                error!(error = %e, "Error sending response");
                break;
            }
        }
    }

    if let Err(e) = conn.shutdown().await {
        debug!(error = %e, "Error shutting down connection");
    }
    metrics.connection_closed();
    info!("Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Endpoint;
    use std::io;
    use tokio::io::DuplexStream;

    /// Listener with no clients; accept only ever ends by deadline.
    struct IdleListener;

    impl Listener for IdleListener {
        type Conn = DuplexStream;

        async fn accept(&self) -> io::Result<DuplexStream> {
            std::future::pending().await
        }

        fn local_endpoint(&self) -> Endpoint {
            Endpoint::Unknown
        }
    }

    #[test]
    fn test_new_server_is_idle() {
        let server = Server::new();
        assert_eq!(server.state(), ServerState::Idle);
        assert_eq!(server.timeout(), Duration::from_secs(30));
        assert_eq!(server.handler_count(), 0);
    }

    #[test]
    fn test_add_handler_appends() {
        let mut server = Server::new();
        server.add_handler(|_req, _resp| Ok(()));
        server.add_handler(|_req, _resp| Ok(()));
        assert_eq!(server.handler_count(), 2);
    }

    #[test]
    fn test_timeout_is_clamped_into_range() {
        let mut server = Server::new();
        server.set_timeout(Duration::ZERO);
        assert_eq!(server.timeout(), SERVER_MIN_TIMEOUT);

        server.set_timeout(Duration::MAX);
        assert_eq!(server.timeout(), SERVER_MAX_TIMEOUT);

        server.set_timeout(Duration::from_millis(250));
        assert_eq!(server.timeout(), Duration::from_millis(250));

        let configured = Server::from_config(&ServerConfig {
            timeout: Duration::ZERO,
            ..ServerConfig::default()
        });
        assert_eq!(configured.timeout(), SERVER_MIN_TIMEOUT);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_honoured_by_start() {
        let server = Arc::new(Server::new());
        let stopper = tokio::spawn({
            let server = server.clone();
            async move { server.stop().await }
        });
        while server.state() != ServerState::StopRequested {
            tokio::task::yield_now().await;
        }

        server.start(IdleListener).await.unwrap();
        stopper.await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_extra_stop_does_not_cut_next_run_short() {
        let server = Arc::new(Server::new());
        for _ in 0..2 {
            let running = tokio::spawn({
                let server = server.clone();
                async move { server.start(IdleListener).await }
            });
            while server.state() != ServerState::Running {
                tokio::task::yield_now().await;
            }

            tokio::join!(server.stop(), server.stop());
            running.await.unwrap().unwrap();
            assert_eq!(server.state(), ServerState::Stopped);
            server.stop().await;
            assert_eq!(server.state(), ServerState::Stopped);
        }

        // A restart after the redundant stops keeps running until told otherwise
        let running = tokio::spawn({
            let server = server.clone();
            async move { server.start(IdleListener).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.state(), ServerState::Running);
        assert!(!running.is_finished());

        server.stop().await;
        running.await.unwrap().unwrap();
    }

    #[test]
    fn test_refresh_deadline_keeps_previous_on_failure() {
        let previous = Some(Instant::now());
        assert_eq!(refresh_deadline(Duration::ZERO, previous, "test"), previous);
        assert!(refresh_deadline(Duration::from_secs(1), None, "test").is_some());
    }

    #[tokio::test]
    async fn test_serve_connection_answers_over_duplex() {
        let mut chain = HandlerChain::new();
        chain.push(|req, resp| {
            resp.set_payload(req.payload().to_vec());
            Ok(())
        });

        let (client_side, server_side) = tokio::io::duplex(1024);
        let metrics = Arc::new(Metrics::new());
        let task = tokio::spawn(serve_connection(
            server_side,
            Arc::new(chain),
            Duration::from_secs(5),
            MAX_PAYLOAD_SIZE,
            metrics.clone(),
        ));

        let mut client_side = client_side;
        Packet::from_payload(b"ping".to_vec())
            .write_to(&mut client_side)
            .await
            .unwrap();
        let mut response = Packet::default();
        response.read_from(&mut client_side).await.unwrap();
        assert_eq!(response.payload(), b"ping");

        drop(client_side);
        task.await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_received, 1);
        assert_eq!(snapshot.responses_sent, 1);
        assert_eq!(snapshot.protocol_errors, 0);
        assert_eq!(snapshot.connections_active, 0);
    }
}
