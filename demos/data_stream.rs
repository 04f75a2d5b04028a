//! Example: Data Stream
//!
//! Streams stdin to a server one byte per request. The server prints every
//! byte it receives and answers each with `OK`.
//!
//! Both ends read `NetworkConfig::from_env`; set `SBTP_SERVER_ADDRESS` and
//! `SBTP_CLIENT_ADDRESS` to move them off the default port.
//!
//! Run the server with: `cargo run --example data_stream -- server`
//! Then the client with: `cargo run --example data_stream -- client`

use std::io::Write;
use std::sync::Arc;

use sbtp::config::NetworkConfig;
use sbtp::utils::logging::init_logging;
use sbtp::{Client, Server};
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mode = std::env::args().nth(1).unwrap_or_else(|| "server".to_string());
    let config = NetworkConfig::from_env()?;

    match mode.as_str() {
        "server" => run_server(config).await,
        "client" => run_client(config).await,
        other => Err(format!("unknown mode '{other}', expected 'server' or 'client'").into()),
    }
}

async fn run_server(mut config: NetworkConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Keep stdout for the streamed bytes
    config.logging.log_level = tracing::Level::WARN;
    init_logging(&config.logging)?;

    let mut server = Server::from_config(&config.server);
    server.add_handler(|request, response| {
        response.set_payload(b"OK".to_vec());
        let mut stdout = std::io::stdout();
        stdout.write_all(request.payload())?;
        stdout.flush()?;
        Ok(())
    });

    let server = Arc::new(server);
    let listener = Server::bind(&config.server).await?;
    println!("starting up on {}...\n", listener.local_addr()?);

    let running = tokio::spawn({
        let server = server.clone();
        async move { server.start(listener).await }
    });

    tokio::signal::ctrl_c().await?;
    server.stop().await;
    running.await??;
    Ok(())
}

async fn run_client(config: NetworkConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::connect_from_config(&config.client).await?;
    println!(
        "Connected to {}, type away (Ctrl-D to finish)",
        config.client.address
    );

    let mut stdin = tokio::io::stdin();
    let mut byte = [0u8; 1];
    loop {
        let read = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            read = stdin.read(&mut byte) => read?,
        };
        if read == 0 {
            break;
        }
        client.request(byte.to_vec()).await?;
    }

    client.close().await?;
    Ok(())
}
