//! Crate-level error type

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;
use crate::wire::{CodecError, MessageType};

/// Errors surfaced by handshakes, sessions and the client/server API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthSocketError {
    /// Send/receive failed or the connection is closed
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// The caller's cancellation token fired mid-operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The handshake deadline passed
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// A received envelope could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] CodecError),

    /// The peer sent a message type the current step does not allow
    #[error("Protocol error: expected {expected}, got {got}")]
    Protocol {
        /// Type the handshake step requires
        expected: MessageType,
        /// Type actually received
        got: MessageType,
    },

    /// Signature or nonce binding verification failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Called before the handshake completed
    #[error("Not authenticated: handshake has not completed")]
    NotAuthenticated,
}

impl AuthSocketError {
    /// True for both token cancellation and deadline expiry
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            AuthSocketError::Cancelled | AuthSocketError::DeadlineExceeded(_)
        )
    }
}

impl From<TransportError> for AuthSocketError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Cancelled => AuthSocketError::Cancelled,
            other => AuthSocketError::Transport(other),
        }
    }
}

/// Result type for authsocket operations
pub type Result<T> = std::result::Result<T, AuthSocketError>;
