//! Authenticated sessions
//!
//! A [`Session`] exists only after a successful handshake. It owns the
//! authenticated transport and runs one receive loop for its lifetime,
//! dispatching `general` envelopes to the registered [`EventHandlers`].
//!
//! The loop stops when the transport closes, the session is closed, or its
//! parent cancellation token fires. It then closes the transport, dropping
//! anything still buffered, and never restarts.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::crypto::PublicKey;
use crate::error::{AuthSocketError, Result};
use crate::transport::{Transport, TransportError};
use crate::wire::{Envelope, EnvelopeCodec, MessageType};

pub mod event;
pub mod handlers;
pub mod registry;

pub use event::Event;
pub use handlers::{EventHandlers, Handler};
pub use registry::{BroadcastReport, SessionId, SessionRegistry};

/// A live, authenticated channel
pub struct Session {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn EnvelopeCodec>,
    peer: Option<PublicKey>,
    shutdown: CancellationToken,
    closed: CancellationToken,
}

impl Session {
    /// Take over an authenticated transport and start the receive loop
    ///
    /// `peer` is the verified remote key when this side checked one (the
    /// server role). The session stops when `parent` is cancelled.
    pub fn start(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn EnvelopeCodec>,
        handlers: EventHandlers,
        peer: Option<PublicKey>,
        parent: &CancellationToken,
    ) -> Self {
        let shutdown = parent.child_token();
        let closed = CancellationToken::new();

        let span = match &peer {
            Some(key) => info_span!("session", peer = %key),
            None => info_span!("session", peer = "server"),
        };

        tokio::spawn(
            receive_loop(
                transport.clone(),
                codec.clone(),
                handlers,
                shutdown.clone(),
                closed.clone(),
            )
            .instrument(span),
        );

        Session {
            transport,
            codec,
            peer,
            shutdown,
            closed,
        }
    }

    /// Verified key of the remote side, if this side verified one
    pub fn peer(&self) -> Option<&PublicKey> {
        self.peer.as_ref()
    }

    /// Whether the receive loop has ended
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the receive loop has ended
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Send a named event to the peer
    pub async fn emit<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> Result<()> {
        let payload = Event::from_data(event, data)?.to_payload()?;
        self.send_payload(payload).await
    }

    /// Send an already encoded event body
    pub(crate) async fn send_payload(&self, payload: Vec<u8>) -> Result<()> {
        if self.shutdown.is_cancelled() || self.closed.is_cancelled() {
            return Err(AuthSocketError::Transport(TransportError::Disconnected));
        }

        let bytes = self.codec.encode(&Envelope::general(payload))?;
        self.transport.send(&bytes, &self.shutdown).await?;
        Ok(())
    }

    /// Stop the receive loop, close the transport and wait for both
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.closed.cancelled().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn receive_loop(
    transport: Arc<dyn Transport>,
    codec: Arc<dyn EnvelopeCodec>,
    handlers: EventHandlers,
    shutdown: CancellationToken,
    closed: CancellationToken,
) {
    loop {
        let bytes = match transport.receive(&shutdown).await {
            Ok(bytes) => bytes,
            Err(TransportError::Cancelled) => {
                debug!("session cancelled");
                break;
            }
            Err(TransportError::Disconnected) => {
                debug!("peer disconnected");
                break;
            }
            Err(e) => {
                warn!(error = %e, "session receive failed");
                break;
            }
        };

        // A corrupt message costs only itself
        let envelope = match codec.decode(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "discarding malformed envelope");
                continue;
            }
        };

        if envelope.kind != MessageType::General {
            debug!(kind = %envelope.kind, "ignoring non-event message");
            continue;
        }

        match Event::from_payload(&envelope.payload) {
            Ok(event) => {
                handlers.dispatch(event);
            }
            Err(e) => warn!(error = %e, "discarding malformed event"),
        }
    }

    if let Err(e) = transport.close().await {
        debug!(error = %e, "transport close failed");
    }
    closed.cancel();
}
