//! Example: Echo Server
//!
//! Starts a server with two handlers (echo the request, then double the
//! response), sends ten requests from a client and shuts everything down.
//! Addresses and timeouts come from `NetworkConfig::from_env`, so the
//! `SBTP_*` variables move both ends.
//!
//! Run with: `cargo run --example echo_server`

use std::sync::Arc;
use std::time::Duration;

use sbtp::config::NetworkConfig;
use sbtp::utils::logging::init_logging;
use sbtp::{Client, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = NetworkConfig::from_env()?;
    config.validate_strict()?;
    init_logging(&config.logging)?;

    let mut server = Server::from_config(&config.server);
    server.add_handler(|request, response| {
        println!(
            "Echoing {} bytes back to {}",
            request.payload().len(),
            request.source()
        );
        response.set_payload(request.payload().to_vec());
        Ok(())
    });
    server.add_handler(|_request, response| {
        println!("Repeating response...");
        let doubled = response.payload().repeat(2);
        response.set_payload(doubled);
        Ok(())
    });

    let server = Arc::new(server);
    let listener = Server::bind(&config.server).await?;
    let running = tokio::spawn({
        let server = server.clone();
        async move { server.start(listener).await }
    });

    let client = Client::connect_from_config(&config.client).await?;

    for _ in 0..10 {
        let response = client.request(b"Hello!".to_vec()).await?;
        println!("Got {} bytes from server", response.payload().len());
    }

    client.close().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("Stopping server...");
    server.stop().await;
    running.await??;
    server.metrics().log_summary();

    Ok(())
}
