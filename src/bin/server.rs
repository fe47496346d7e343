//! authsocket WebSocket server
//!
//! Accepts WebSocket connections, authenticates every client with the
//! challenge-response handshake and relays chat-style `message` events:
//! - each accepted client triggers a welcome broadcast
//! - every `message` event received is rebroadcast to all clients
//!
//! Usage:
//!   authsocket-server [--port 8765] [--host 0.0.0.0] [--format json]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use authsocket::{AuthSocketServer, Config, WebSocketTransport, WireFormat};
use clap::Parser;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// authsocket server
#[derive(Parser)]
#[command(name = "authsocket-server")]
#[command(about = "WebSocket server for mutually authenticated event sessions")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8765")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Envelope encoding (json or binary); clients must match
    #[arg(short, long, default_value = "json")]
    format: WireFormat,

    /// Seconds a client has to complete the handshake
    #[arg(long, default_value = "10")]
    timeout_secs: u64,
}

/// Handle a single WebSocket connection
async fn handle_connection(stream: TcpStream, addr: SocketAddr, server: Arc<AuthSocketServer>) {
    info!("New connection from: {}", addr);

    let transport = match WebSocketTransport::accept(stream).await {
        Ok(transport) => transport,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let id = match server
        .accept_client(transport, &CancellationToken::new())
        .await
    {
        Ok(id) => id,
        Err(e) => {
            warn!("Client {} failed authentication: {}", addr, e);
            return;
        }
    };
    info!("Client {} authenticated as {}", addr, id);

    let welcome = json!({ "from": "Server", "text": "Welcome!" });
    match server.emit("message", &welcome).await {
        Ok(report) if !report.is_complete() => {
            warn!("Welcome reached {} of {} clients", report.delivered, report.delivered + report.failed.len());
        }
        Ok(_) => {}
        Err(e) => error!("Welcome broadcast failed: {}", e),
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("authsocket=info,authsocket_server=info")),
        )
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let config = Config::default()
        .with_wire_format(args.format)
        .with_handshake_timeout(Duration::from_secs(args.timeout_secs));
    let server = Arc::new(AuthSocketServer::new(config));

    // Rebroadcast chat messages to everyone
    let registry = server.registry().clone();
    server.on("message", move |data| {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.broadcast("message", &data).await {
                error!("Rebroadcast failed: {}", e);
            }
        });
    });

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("authsocket server listening on ws://{} ({} envelopes)", addr, args.format);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(handle_connection(stream, addr, server.clone()));
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    server.shutdown().await;
}
