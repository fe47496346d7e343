//! # authsocket
//!
//! Mutually authenticated event channels over any message transport.
//!
//! ## Features
//!
//! - **Challenge-response handshake**: the client signs a fresh,
//!   single-use server nonce with its Ed25519 key
//! - **Named events** with arbitrary JSON data once authenticated
//! - **Pluggable transport** layer (in-memory pair, WebSocket)
//! - **Two wire formats**: JSON envelopes or length-prefixed binary frames
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use authsocket::{transport::memory, AuthSocketClient, AuthSocketServer, Identity};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> authsocket::Result<()> {
//! let (client_side, server_side) = memory::create_pair();
//! let server = AuthSocketServer::default();
//! let client = AuthSocketClient::new(client_side, Identity::generate());
//!
//! server.on("test-event", |data| println!("server got {}", data));
//!
//! let cancel = CancellationToken::new();
//! let (connected, accepted) = tokio::join!(
//!     client.connect(&cancel),
//!     server.accept_client(server_side, &cancel),
//! );
//! connected?;
//! accepted?;
//!
//! client.emit("test-event", "hello world").await?;
//! server.emit("server-event", &42).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  API LAYER                  │
//! │     AuthSocketClient  |  AuthSocketServer   │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │              PROTOCOL LAYER                 │
//! │  Handshake (hello/nonce/auth/ok) | Session  │
//! │  Session registry | Event handlers          │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │           WIRE + CRYPTO LAYER               │
//! │  JSON / binary envelope codecs | Ed25519    │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │             TRANSPORT LAYER                 │
//! │          In-memory  |  WebSocket            │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod server;
pub mod session;
pub mod transport;
pub mod wire;

// Re-export main types at crate root
pub use client::AuthSocketClient;
pub use config::Config;
pub use crypto::{random_bytes, verify, CryptoError, Identity, PublicKey, SignatureBytes};
pub use error::{AuthSocketError, Result};
pub use server::AuthSocketServer;
pub use session::{BroadcastReport, Event, Session, SessionId, SessionRegistry};
pub use transport::{Transport, TransportError, WebSocketTransport};
pub use wire::{Envelope, EnvelopeCodec, MessageType, WireFormat};
