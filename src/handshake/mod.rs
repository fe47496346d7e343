//! Four-message challenge-response handshake
//!
//! ```text
//! client                                server
//!   | -- hello { identityKey } ----------> |
//!   | <--------------------- nonce { N } - |   N: fresh 32 random bytes
//!   | -- auth { identityKey, N, sig(N) } > |   verify binding + signature
//!   | <------------------------------ ok - |   (or error { reason })
//! ```
//!
//! Both roles are linear: any transport failure, cancellation, decode
//! failure or unexpected message aborts the attempt. Nothing is retried
//! internally; a retry is a new attempt with a new nonce.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::crypto::{constant_time_eq, random_bytes, Identity};
use crate::error::{AuthSocketError, Result};
use crate::transport::Transport;
use crate::wire::{Envelope, EnvelopeCodec, MessageType};

pub mod client;
pub mod server;

pub use crate::wire::NONCE_SIZE;
pub use client::{ClientHandshake, ClientState};
pub use server::{ServerHandshake, ServerState, VerifiedPeer};

/// Single-use server challenge
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Draw a fresh nonce from the OS-seeded RNG
    pub fn generate() -> Self {
        Nonce(random_bytes())
    }

    /// Raw nonce bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    /// Constant-time comparison against an echoed nonce
    pub fn matches(&self, echoed: &[u8]) -> bool {
        constant_time_eq(&self.0, echoed)
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({}...)", &hex::encode(self.0)[..16])
    }
}

/// Run the client role over `transport` within the configured deadline
pub async fn run_client(
    transport: &dyn Transport,
    identity: &Identity,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    let codec = config.codec();
    let mut handshake = ClientHandshake::new(identity, codec.as_ref());
    with_deadline(config.handshake_timeout, handshake.run(transport, cancel)).await
}

/// Run the server role over `transport` within the configured deadline
pub async fn run_server(
    transport: &dyn Transport,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<VerifiedPeer> {
    let codec = config.codec();
    let mut handshake = ServerHandshake::new(codec.as_ref());
    with_deadline(config.handshake_timeout, handshake.run(transport, cancel)).await
}

pub(crate) async fn with_deadline<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| AuthSocketError::DeadlineExceeded(timeout))?
}

pub(crate) async fn send_envelope(
    transport: &dyn Transport,
    codec: &dyn EnvelopeCodec,
    envelope: &Envelope,
    cancel: &CancellationToken,
) -> Result<()> {
    let bytes = codec.encode(envelope)?;
    transport.send(&bytes, cancel).await?;
    Ok(())
}

pub(crate) async fn receive_envelope(
    transport: &dyn Transport,
    codec: &dyn EnvelopeCodec,
    cancel: &CancellationToken,
) -> Result<Envelope> {
    let bytes = transport.receive(cancel).await?;
    Ok(codec.decode(&bytes)?)
}

fn expect_type(envelope: &Envelope, expected: MessageType) -> Result<()> {
    if envelope.kind != expected {
        return Err(AuthSocketError::Protocol {
            expected,
            got: envelope.kind,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;
    use crate::wire::WireFormat;
    use std::collections::HashSet;

    const TEST_SECRET: &str = "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20";

    #[test]
    fn test_nonces_do_not_repeat() {
        let nonces: HashSet<[u8; NONCE_SIZE]> =
            (0..1000).map(|_| *Nonce::generate().as_bytes()).collect();
        assert_eq!(nonces.len(), 1000);
    }

    #[test]
    fn test_nonce_matches() {
        let nonce = Nonce::generate();
        assert!(nonce.matches(nonce.as_bytes()));

        let mut other = *nonce.as_bytes();
        other[31] ^= 1;
        assert!(!nonce.matches(&other));
        assert!(!nonce.matches(&other[..16]));
    }

    async fn handshake_pair(config: &Config) -> (Result<()>, Result<VerifiedPeer>, Identity) {
        let identity = Identity::from_secret_hex(TEST_SECRET).unwrap();
        let (client_t, server_t) = memory::create_pair();
        let cancel = CancellationToken::new();

        let (client, server) = tokio::join!(
            run_client(&client_t, &identity, config, &cancel),
            run_server(&server_t, config, &cancel),
        );
        (client, server, identity)
    }

    #[tokio::test]
    async fn test_handshake_over_memory_pair() {
        let (client, server, identity) = handshake_pair(&Config::default()).await;

        client.unwrap();
        assert_eq!(&server.unwrap().public_key, identity.public_key());
    }

    #[tokio::test]
    async fn test_handshake_over_binary_frames() {
        let config = Config::default().with_wire_format(WireFormat::Binary);
        let (client, server, identity) = handshake_pair(&config).await;

        client.unwrap();
        assert_eq!(&server.unwrap().public_key, identity.public_key());
    }

    #[tokio::test]
    async fn test_consecutive_handshakes_use_distinct_nonces() {
        let mut nonces = HashSet::new();

        for i in 0..5 {
            let (client, server, _) = handshake_pair(&Config::default()).await;
            assert!(client.is_ok(), "iteration {}: {:?}", i, client);
            let peer = server.unwrap_or_else(|e| panic!("iteration {}: {}", i, e));
            nonces.insert(*peer.nonce.as_bytes());
        }

        assert_eq!(nonces.len(), 5);
    }

    #[tokio::test]
    async fn test_client_deadline_without_server() {
        let identity = Identity::from_secret_hex(TEST_SECRET).unwrap();
        let (client_t, _server_t) = memory::create_pair();
        let config = Config::default().with_handshake_timeout(Duration::from_millis(50));

        let err = run_client(&client_t, &identity, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, AuthSocketError::DeadlineExceeded(Duration::from_millis(50)));
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_server_cancelled_while_waiting_for_hello() {
        let (_client_t, server_t) = memory::create_pair();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = run_server(&server_t, &Config::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, AuthSocketError::Cancelled);
    }
}
