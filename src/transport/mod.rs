//! Transport layer abstraction
//!
//! A transport moves opaque messages between two endpoints, in order, at
//! most once. It knows nothing about handshakes or envelopes.
//!
//! - In-memory channel pairs (tests, same-process composition)
//! - WebSocket connections (cross-process)
//!
//! # Design
//!
//! Methods take `&self` so one transport can be shared between a session's
//! receive loop and any number of emitters. Each implementation serializes
//! its own send path and receive path independently; a pending `receive`
//! never blocks a `send`.
//!
//! Every suspending method takes a [`CancellationToken`]. When it fires the
//! call returns [`TransportError::Cancelled`] promptly.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod websocket;
pub use websocket::WebSocketTransport;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("Connection closed")]
    Disconnected,

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Abstract transport trait
///
/// All transports must implement this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message to the peer
    async fn send(&self, data: &[u8], cancel: &CancellationToken) -> TransportResult<()>;

    /// Receive the next message from the peer
    ///
    /// Suspends until a message arrives, the connection closes, or `cancel`
    /// fires.
    async fn receive(&self, cancel: &CancellationToken) -> TransportResult<Vec<u8>>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Close the transport, dropping anything not yet received
    async fn close(&self) -> TransportResult<()>;
}

/// In-memory transport for testing
///
/// Uses channels to simulate a connection between two endpoints.
pub mod memory {
    use super::*;
    use tokio::sync::{mpsc, Mutex};

    /// Messages buffered per direction before `send` waits
    pub const CHANNEL_CAPACITY: usize = 100;

    /// Create a pair of connected in-memory transports
    pub fn create_pair() -> (MemoryTransport, MemoryTransport) {
        let (tx1, rx1) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx2, rx2) = mpsc::channel(CHANNEL_CAPACITY);
        let link = CancellationToken::new();

        let transport1 = MemoryTransport {
            tx: tx1,
            rx: Mutex::new(rx2),
            link: link.clone(),
        };

        let transport2 = MemoryTransport {
            tx: tx2,
            rx: Mutex::new(rx1),
            link,
        };

        (transport1, transport2)
    }

    /// In-memory transport endpoint
    ///
    /// Closing either end closes the link for both.
    #[derive(Debug)]
    pub struct MemoryTransport {
        tx: mpsc::Sender<Vec<u8>>,
        rx: Mutex<mpsc::Receiver<Vec<u8>>>,
        link: CancellationToken,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, data: &[u8], cancel: &CancellationToken) -> TransportResult<()> {
            if self.link.is_cancelled() {
                return Err(TransportError::Disconnected);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                _ = self.link.cancelled() => Err(TransportError::Disconnected),
                sent = self.tx.send(data.to_vec()) => {
                    sent.map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
                }
            }
        }

        async fn receive(&self, cancel: &CancellationToken) -> TransportResult<Vec<u8>> {
            if self.link.is_cancelled() {
                return Err(TransportError::Disconnected);
            }

            // One receiver at a time; waiting for the lock is cancellable too
            let mut rx = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = self.link.cancelled() => return Err(TransportError::Disconnected),
                rx = self.rx.lock() => rx,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                _ = self.link.cancelled() => Err(TransportError::Disconnected),
                msg = rx.recv() => msg.ok_or(TransportError::Disconnected),
            }
        }

        fn is_connected(&self) -> bool {
            !self.link.is_cancelled()
        }

        async fn close(&self) -> TransportResult<()> {
            self.link.cancel();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_memory_transport() {
        let (alice, bob) = memory::create_pair();
        let cancel = CancellationToken::new();

        // Alice sends to Bob
        alice.send(b"Hello Bob", &cancel).await.unwrap();
        let received = bob.receive(&cancel).await.unwrap();
        assert_eq!(received, b"Hello Bob");

        // Bob sends to Alice
        bob.send(b"Hello Alice", &cancel).await.unwrap();
        let received = alice.receive(&cancel).await.unwrap();
        assert_eq!(received, b"Hello Alice");
    }

    #[tokio::test]
    async fn test_memory_transport_preserves_order() {
        let (alice, bob) = memory::create_pair();
        let cancel = CancellationToken::new();

        for i in 0..10u8 {
            alice.send(&[i], &cancel).await.unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(bob.receive(&cancel).await.unwrap(), vec![i]);
        }
    }

    #[tokio::test]
    async fn test_memory_transport_close() {
        let (alice, bob) = memory::create_pair();
        let cancel = CancellationToken::new();

        alice.close().await.unwrap();
        assert!(!alice.is_connected());
        assert!(!bob.is_connected());

        assert_eq!(
            alice.send(b"test", &cancel).await,
            Err(TransportError::Disconnected)
        );
        assert_eq!(bob.receive(&cancel).await, Err(TransportError::Disconnected));
    }

    #[tokio::test]
    async fn test_close_wakes_pending_receive() {
        let (alice, bob) = memory::create_pair();
        let bob = Arc::new(bob);

        let pending = {
            let bob = bob.clone();
            tokio::spawn(async move { bob.receive(&CancellationToken::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        alice.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("receive did not wake on close")
            .unwrap();
        assert_eq!(result, Err(TransportError::Disconnected));
    }

    #[tokio::test]
    async fn test_cancelled_receive_returns_promptly() {
        let (_alice, bob) = memory::create_pair();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(1), bob.receive(&cancel))
            .await
            .expect("receive hung after cancellation");
        assert_eq!(result, Err(TransportError::Cancelled));
    }

    #[tokio::test]
    async fn test_send_not_blocked_by_pending_receive() {
        let (alice, bob) = memory::create_pair();
        let alice = Arc::new(alice);
        let cancel = CancellationToken::new();

        let receiver = {
            let alice = alice.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { alice.receive(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        tokio::time::timeout(Duration::from_secs(1), alice.send(b"ping", &cancel))
            .await
            .expect("send blocked behind receive")
            .unwrap();
        assert_eq!(bob.receive(&cancel).await.unwrap(), b"ping");

        bob.send(b"pong", &cancel).await.unwrap();
        assert_eq!(receiver.await.unwrap().unwrap(), b"pong");
    }
}
