//! Server side: accept clients, verify them, broadcast to them
//!
//! Every accepted transport goes through the server handshake. Only a
//! verified client gets a [`Session`], which is registered under a fresh
//! [`SessionId`] and dispatches into the server-wide handler table.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{AuthSocketError, Result};
use crate::handshake;
use crate::session::{BroadcastReport, EventHandlers, Session, SessionId, SessionRegistry};
use crate::transport::Transport;

/// Accepts authenticated clients and fans events out to them
pub struct AuthSocketServer {
    config: Config,
    registry: SessionRegistry,
    handlers: EventHandlers,
    shutdown: CancellationToken,
}

impl Default for AuthSocketServer {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl AuthSocketServer {
    /// Create a server; clients must use the same wire format
    pub fn new(config: Config) -> Self {
        AuthSocketServer {
            config,
            registry: SessionRegistry::new(),
            handlers: EventHandlers::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a handler for events from any client
    ///
    /// Applies to sessions accepted before and after the call.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.handlers.on(event, handler);
    }

    /// Authenticate a newly connected client and start its session
    ///
    /// Nothing is registered when the handshake fails; the transport is
    /// closed and the failure returned. `cancel` only bounds the handshake.
    /// The session then lives until the client leaves or the server shuts
    /// down.
    pub async fn accept_client(
        &self,
        transport: impl Transport + 'static,
        cancel: &CancellationToken,
    ) -> Result<SessionId> {
        let transport: Arc<dyn Transport> = Arc::new(transport);

        let attempt = self.shutdown.child_token();
        let outcome = tokio::select! {
            outcome = handshake::run_server(transport.as_ref(), &self.config, &attempt) => outcome,
            _ = cancel.cancelled() => Err(AuthSocketError::Cancelled),
        };

        let peer = match outcome {
            Ok(peer) => peer,
            Err(e) => {
                debug!(error = %e, "handshake failed, closing transport");
                if let Err(e) = transport.close().await {
                    debug!(error = %e, "transport close failed");
                }
                return Err(e);
            }
        };

        let session = Session::start(
            transport,
            self.config.codec(),
            self.handlers.clone(),
            Some(peer.public_key),
            &self.shutdown,
        );
        let id = self.registry.insert(Arc::new(session)).await;
        info!(%id, peer = %peer.public_key, "client accepted");

        Ok(id)
    }

    /// Broadcast an event to every connected client
    pub async fn emit<T: Serialize + ?Sized>(
        &self,
        event: &str,
        data: &T,
    ) -> Result<BroadcastReport> {
        self.registry.broadcast(event, data).await
    }

    /// Send an event to one client
    pub async fn emit_to<T: Serialize + ?Sized>(
        &self,
        id: SessionId,
        event: &str,
        data: &T,
    ) -> Result<()> {
        let session = self
            .registry
            .get(id)
            .await
            .ok_or(AuthSocketError::NotAuthenticated)?;
        session.emit(event, data).await
    }

    /// Live sessions
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Configuration clients must match
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop accepting, abort pending handshakes and close every session
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.close_all().await;
        info!("server shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for AuthSocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSocketServer")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AuthSocketClient;
    use crate::crypto::Identity;
    use crate::transport::memory;
    use crate::wire::{Envelope, EnvelopeCodec, JsonCodec, WireFormat, NONCE_SIZE};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const TEST_SECRET: &str = "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20";

    fn recorder() -> (impl Fn(Value) + Send + Sync + 'static, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = move |data: Value| {
            let _ = tx.send(data);
        };
        (handler, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no event delivered")
            .expect("handler dropped")
    }

    async fn connect(
        server: &AuthSocketServer,
        identity: Identity,
    ) -> (AuthSocketClient, SessionId) {
        let (client_t, server_t) = memory::create_pair();
        let client = AuthSocketClient::with_config(client_t, identity, server.config().clone());
        let cancel = CancellationToken::new();

        let (connected, accepted) =
            tokio::join!(client.connect(&cancel), server.accept_client(server_t, &cancel));
        connected.unwrap();
        (client, accepted.unwrap())
    }

    #[tokio::test]
    async fn test_end_to_end_event_exchange() {
        let server = AuthSocketServer::default();
        let (handler, mut at_server) = recorder();
        server.on("test-event", handler);

        let identity = Identity::from_secret_hex(TEST_SECRET).unwrap();
        let key = *identity.public_key();
        let (client, id) = connect(&server, identity).await;
        let (handler, mut at_client) = recorder();
        client.on("server-event", handler);

        assert!(client.is_authenticated());
        assert_eq!(server.registry().sessions_for(&key).await, vec![id]);

        client.emit("test-event", "hello world").await.unwrap();
        assert_eq!(next(&mut at_server).await, json!("hello world"));

        let report = server.emit("server-event", &42).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(next(&mut at_client).await, json!(42));
    }

    #[tokio::test]
    async fn test_end_to_end_over_binary_frames() {
        let server =
            AuthSocketServer::new(Config::default().with_wire_format(WireFormat::Binary));
        let (handler, mut at_server) = recorder();
        server.on("ping", handler);

        let (client, _) = connect(&server, Identity::generate()).await;
        client.emit("ping", &json!({"seq": 1})).await.unwrap();

        assert_eq!(next(&mut at_server).await, json!({"seq": 1}));
    }

    #[tokio::test]
    async fn test_same_identity_gets_separate_sessions() {
        let server = AuthSocketServer::default();
        let identity = Identity::generate();
        let key = *identity.public_key();

        let (_c1, id1) = connect(&server, identity.clone()).await;
        let (_c2, id2) = connect(&server, identity).await;

        assert_ne!(id1, id2);
        assert_eq!(server.registry().sessions_for(&key).await, vec![id1, id2]);
        assert_eq!(server.registry().len().await, 2);
    }

    #[tokio::test]
    async fn test_emit_to_targets_one_client() {
        let server = AuthSocketServer::default();
        let (a, id_a) = connect(&server, Identity::generate()).await;
        let (b, _) = connect(&server, Identity::generate()).await;
        let (handler, mut at_a) = recorder();
        a.on("direct", handler);
        let (handler, mut at_b) = recorder();
        b.on("direct", handler);

        server.emit_to(id_a, "direct", "only a").await.unwrap();
        assert_eq!(next(&mut at_a).await, json!("only a"));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), at_b.recv())
                .await
                .is_err()
        );

        assert_eq!(
            server
                .emit_to(SessionId(1000), "direct", "nobody")
                .await
                .unwrap_err(),
            AuthSocketError::NotAuthenticated
        );
    }

    #[tokio::test]
    async fn test_failed_handshake_registers_nothing() {
        let server = AuthSocketServer::default();
        let (client_t, server_t) = memory::create_pair();
        let cancel = CancellationToken::new();
        let codec = JsonCodec::default();

        // Signs a nonce of its own choosing instead of the issued one
        let forger = async {
            let identity = Identity::generate();
            let hello = Envelope::hello(*identity.public_key());
            client_t
                .send(&codec.encode(&hello).unwrap(), &cancel)
                .await
                .unwrap();
            client_t.receive(&cancel).await.unwrap();

            let chosen = [7u8; NONCE_SIZE];
            let auth = Envelope::auth(*identity.public_key(), &chosen, identity.sign(&chosen));
            client_t
                .send(&codec.encode(&auth).unwrap(), &cancel)
                .await
                .unwrap();
        };

        let (accepted, ()) = tokio::join!(server.accept_client(server_t, &cancel), forger);

        assert!(matches!(accepted, Err(AuthSocketError::Authentication(_))));
        assert!(server.registry().is_empty().await);
        assert!(!client_t.is_connected());
    }

    #[tokio::test]
    async fn test_client_disconnect_removes_session() {
        let server = AuthSocketServer::default();
        let (client, id) = connect(&server, Identity::generate()).await;
        assert!(server.registry().get(id).await.is_some());

        client.close().await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while !server.registry().is_empty().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session was not removed");

        let report = server.emit("anyone", &()).await.unwrap();
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions_and_refuses_handshakes() {
        let server = AuthSocketServer::default();
        let (client, _) = connect(&server, Identity::generate()).await;

        server.shutdown().await;
        assert!(server.is_shut_down());
        assert!(server.registry().is_empty().await);

        let session = client.session().unwrap();
        tokio::time::timeout(Duration::from_secs(1), session.closed())
            .await
            .expect("client did not observe shutdown");
        assert!(client.emit("late", &()).await.is_err());

        let (_client_t, server_t) = memory::create_pair();
        let err = server
            .accept_client(server_t, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, AuthSocketError::Cancelled);
    }
}
