//! Chaos tests
//!
//! Exercises the server against peers that trickle bytes, stall halfway
//! through a frame, or vanish mid-exchange.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use sbtp::core::packet::Packet;
use sbtp::service::client::Client;
use sbtp::service::server::Server;
use sbtp::transport::tcp;
use sbtp::utils::metrics::MetricsSnapshot;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::sleep;

async fn start_echo(timeout: Duration) -> (Arc<Server>, String, JoinHandle<sbtp::Result<()>>) {
    let mut server = Server::new();
    server.set_timeout(timeout);
    server.add_handler(|req, resp| {
        resp.set_payload(req.payload().to_vec());
        Ok(())
    });
    let server = Arc::new(server);

    let listener = tcp::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let task = tokio::spawn({
        let server = server.clone();
        async move { server.start(listener).await }
    });
    (server, addr, task)
}

async fn wait_closed(server: &Server, connections: u64) -> MetricsSnapshot {
    for _ in 0..300 {
        let snapshot = server.metrics().snapshot();
        if snapshot.connections_total >= connections && snapshot.connections_active == 0 {
            return snapshot;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("connection never closed: {:?}", server.metrics().snapshot());
}

#[tokio::test]
async fn test_trickled_request_is_reassembled() {
    let (server, addr, task) = start_echo(Duration::from_secs(5)).await;

    let frame = Packet::from_payload(b"one byte at a time".to_vec()).to_bytes();
    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream.set_nodelay(true).unwrap();
    for byte in &frame {
        stream.write_all(std::slice::from_ref(byte)).await.unwrap();
        sleep(Duration::from_millis(2)).await;
    }

    let mut response = Packet::default();
    response.read_from(&mut stream).await.unwrap();
    assert_eq!(response.payload(), b"one byte at a time");

    drop(stream);
    server.stop().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stalled_frame_times_out() {
    let (server, addr, task) = start_echo(Duration::from_millis(150)).await;

    let frame = Packet::from_payload(vec![7; 64]).to_bytes();
    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream.write_all(&frame[..30]).await.unwrap();

    // The server gives up on the half-sent request and hangs up
    let snapshot = wait_closed(&server, 1).await;
    assert_eq!(snapshot.requests_received, 0);
    assert_eq!(snapshot.protocol_errors, 0);

    let mut response = Packet::default();
    assert!(response.read_from(&mut stream).await.is_err());

    server.stop().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_peer_vanishes_mid_frame() {
    let (server, addr, task) = start_echo(Duration::from_secs(5)).await;

    let frame = Packet::from_payload(vec![1; 1000]).to_bytes();
    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream.write_all(&frame[..500]).await.unwrap();
    drop(stream);

    let snapshot = wait_closed(&server, 1).await;
    assert_eq!(snapshot.requests_received, 0);
    assert_eq!(snapshot.protocol_errors, 1);

    // The server keeps serving everyone else
    let client = Client::new();
    client.connect("tcp", &addr).await.unwrap();
    assert_eq!(client.request(b"still up".to_vec()).await.unwrap().payload(), b"still up");
    client.close().await.unwrap();

    server.stop().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_slow_reader_gets_full_response() {
    let (server, addr, task) = start_echo(Duration::from_secs(5)).await;

    let payload: Vec<u8> = (0..=255u8).cycle().take(2 * 1024 * 1024).collect();
    let client = Client::with_timeout(Duration::from_secs(10));
    client.connect("tcp", &addr).await.unwrap();

    let response = client.request(payload.clone()).await.unwrap();
    assert_eq!(response.payload().len(), payload.len());
    assert_eq!(response.payload(), &payload[..]);

    client.close().await.unwrap();
    server.stop().await;
    task.await.unwrap().unwrap();
}
