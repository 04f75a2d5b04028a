#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use bytes::BytesMut;
use sbtp::core::codec::PacketCodec;
use sbtp::core::packet::Packet;
use sbtp::service::client::Client;
use sbtp::service::server::Server;
use sbtp::transport::tcp;
use tokio::task::JoinSet;
use tokio_util::codec::{Decoder, Encoder};

fn tagging_server() -> Server {
    let mut server = Server::new();
    server.add_handler(|req, resp| {
        let mut payload = b"ack:".to_vec();
        payload.extend_from_slice(req.payload());
        resp.set_payload(payload);
        Ok(())
    });
    server
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_clients_get_their_own_responses() {
    let server = Arc::new(tagging_server());
    let listener = tcp::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let running = tokio::spawn({
        let server = server.clone();
        async move { server.start(listener).await }
    });

    let clients = 32usize;
    let requests = 25usize;

    let mut tasks = JoinSet::new();
    for c in 0..clients {
        let addr = addr.clone();
        tasks.spawn(async move {
            let client = Client::new();
            client.connect("tcp", &addr).await.unwrap();
            for r in 0..requests {
                let body = format!("client-{c}-request-{r}");
                let response = client.request(body.clone()).await.unwrap();
                assert_eq!(response.payload(), format!("ack:{body}").as_bytes());
            }
            client.close().await.unwrap();
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    server.stop().await;
    running.await.unwrap().unwrap();

    let snapshot = server.metrics().snapshot();
    assert_eq!(snapshot.connections_total, clients as u64);
    assert_eq!(snapshot.requests_received, (clients * requests) as u64);
    assert_eq!(snapshot.protocol_errors, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_client_serializes_exchanges() {
    let server = Arc::new(tagging_server());
    let listener = tcp::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let running = tokio::spawn({
        let server = server.clone();
        async move { server.start(listener).await }
    });

    let client = Arc::new(Client::new());
    client.connect("tcp", &addr).await.unwrap();

    // Every task shares one connection; responses must never cross over
    let mut tasks = JoinSet::new();
    for t in 0..16u32 {
        let client = client.clone();
        tasks.spawn(async move {
            for r in 0..20u32 {
                let body = vec![(t * 20 + r) as u8; (t as usize + 1) * 97];
                let response = client.request(body.clone()).await.unwrap();
                assert_eq!(&response.payload()[..4], b"ack:");
                assert_eq!(&response.payload()[4..], &body[..]);
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    client.close().await.unwrap();
    server.stop().await;
    running.await.unwrap().unwrap();
    assert_eq!(server.metrics().snapshot().connections_total, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_encode_decode_heavy() {
    let iterations = 5_000usize;
    let payload_sizes = [0usize, 64, 512, 4096, 65536];

    let mut tasks = JoinSet::new();
    for &size in &payload_sizes {
        tasks.spawn(async move {
            let mut codec = PacketCodec::new();
            let mut buf = BytesMut::new();
            for i in 0..iterations {
                let payload = vec![((i + size) & 0xFF) as u8; size];
                codec.encode(Packet::from_payload(payload.clone()), &mut buf).unwrap();
                let decoded = codec.decode(&mut buf).unwrap().expect("complete frame");
                assert_eq!(decoded.payload(), &payload[..]);
                assert!(buf.is_empty());
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}
