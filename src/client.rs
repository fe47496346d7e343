//! Client side of an authenticated link
//!
//! ```rust,no_run
//! use authsocket::{AuthSocketClient, Identity, WebSocketTransport};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> authsocket::Result<()> {
//! let transport = WebSocketTransport::connect("ws://127.0.0.1:8765").await?;
//! let client = AuthSocketClient::new(transport, Identity::generate());
//!
//! client.on("message", |data| println!("{}", data));
//! client.connect(&CancellationToken::new()).await?;
//! client.emit("message", "hello").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::crypto::{Identity, PublicKey};
use crate::error::{AuthSocketError, Result};
use crate::handshake;
use crate::session::{EventHandlers, Session};
use crate::transport::Transport;

/// Proves its identity to a server, then exchanges events with it
pub struct AuthSocketClient {
    transport: Arc<dyn Transport>,
    identity: Identity,
    config: Config,
    handlers: EventHandlers,
    session: OnceCell<Session>,
}

impl AuthSocketClient {
    /// Client over `transport` with the default configuration
    pub fn new(transport: impl Transport + 'static, identity: Identity) -> Self {
        Self::with_config(transport, identity, Config::default())
    }

    /// Client over `transport` with an explicit configuration
    pub fn with_config(
        transport: impl Transport + 'static,
        identity: Identity,
        config: Config,
    ) -> Self {
        AuthSocketClient {
            transport: Arc::new(transport),
            identity,
            config,
            handlers: EventHandlers::new(),
            session: OnceCell::new(),
        }
    }

    /// Run the handshake and start the session
    ///
    /// Returns immediately once connected; concurrent callers share a single
    /// attempt. A failed attempt closes the transport. The session lives
    /// until `cancel` fires, the server goes away or [`close`](Self::close)
    /// is called.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        self.session
            .get_or_try_init(|| async {
                let outcome = handshake::run_client(
                    self.transport.as_ref(),
                    &self.identity,
                    &self.config,
                    cancel,
                )
                .await;

                if let Err(e) = outcome {
                    debug!(error = %e, "handshake failed, closing transport");
                    if let Err(e) = self.transport.close().await {
                        debug!(error = %e, "transport close failed");
                    }
                    return Err(e);
                }

                info!(identity = %self.identity.public_key(), "connected");
                Ok(Session::start(
                    self.transport.clone(),
                    self.config.codec(),
                    self.handlers.clone(),
                    None,
                    cancel,
                ))
            })
            .await?;
        Ok(())
    }

    /// Register a handler for a named event
    ///
    /// Handlers may be added before or after connecting.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.handlers.on(event, handler);
    }

    /// Send a named event to the server
    pub async fn emit<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> Result<()> {
        self.session
            .get()
            .ok_or(AuthSocketError::NotAuthenticated)?
            .emit(event, data)
            .await
    }

    /// Whether the handshake completed
    pub fn is_authenticated(&self) -> bool {
        self.session.initialized()
    }

    /// Our own public key
    pub fn public_key(&self) -> &PublicKey {
        self.identity.public_key()
    }

    /// The live session, once connected
    pub fn session(&self) -> Option<&Session> {
        self.session.get()
    }

    /// End the session and close the transport
    pub async fn close(&self) {
        match self.session.get() {
            Some(session) => session.close().await,
            None => {
                if let Err(e) = self.transport.close().await {
                    debug!(error = %e, "transport close failed");
                }
            }
        }
    }
}

impl std::fmt::Debug for AuthSocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSocketClient")
            .field("identity", self.identity.public_key())
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;
    use crate::transport::TransportError;
    use crate::wire::{Envelope, EnvelopeCodec, JsonCodec, MessageType};
    use std::time::Duration;

    #[tokio::test]
    async fn test_emit_before_connect_sends_nothing() {
        let (client_t, server_t) = memory::create_pair();
        let client = AuthSocketClient::new(client_t, Identity::generate());

        assert_eq!(
            client.emit("early", "data").await.unwrap_err(),
            AuthSocketError::NotAuthenticated
        );
        assert!(!client.is_authenticated());
        assert!(client.session().is_none());

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        assert_eq!(
            server_t.receive(&cancel).await.unwrap_err(),
            TransportError::Cancelled
        );
    }

    #[tokio::test]
    async fn test_close_before_connect_closes_transport() {
        let (client_t, server_t) = memory::create_pair();
        let client = AuthSocketClient::new(client_t, Identity::generate());

        client.close().await;
        client.close().await;

        assert!(!server_t.is_connected());
        assert_eq!(
            server_t.receive(&CancellationToken::new()).await.unwrap_err(),
            TransportError::Disconnected
        );
    }

    #[tokio::test]
    async fn test_rejected_handshake_closes_transport() {
        let (client_t, server_t) = memory::create_pair();
        let client = AuthSocketClient::new(client_t, Identity::generate());
        let cancel = CancellationToken::new();
        let codec = JsonCodec::default();

        let server = async {
            let hello = codec.decode(&server_t.receive(&cancel).await.unwrap()).unwrap();
            assert_eq!(hello.kind, MessageType::Hello);
            server_t
                .send(&codec.encode(&Envelope::error("go away")).unwrap(), &cancel)
                .await
                .unwrap();
        };

        let (result, ()) = tokio::join!(client.connect(&cancel), server);

        assert!(matches!(result, Err(AuthSocketError::Protocol { .. })));
        assert!(!client.is_authenticated());
        assert!(!server_t.is_connected());
        assert_eq!(
            client.emit("late", &()).await.unwrap_err(),
            AuthSocketError::NotAuthenticated
        );
    }

    #[tokio::test]
    async fn test_connect_cancelled() {
        let (client_t, _server_t) = memory::create_pair();
        let client = AuthSocketClient::new(client_t, Identity::generate());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = client.connect(&cancel).await.unwrap_err();
        assert_eq!(err, AuthSocketError::Cancelled);
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_connect_times_out_against_silent_server() {
        let (client_t, _server_t) = memory::create_pair();
        let config = Config::default().with_handshake_timeout(Duration::from_millis(30));
        let client = AuthSocketClient::with_config(client_t, Identity::generate(), config);

        let err = client.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AuthSocketError::DeadlineExceeded(_)));
    }
}
