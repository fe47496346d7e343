//! Client role: announce identity, answer the challenge

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{expect_type, receive_envelope, send_envelope};
use crate::crypto::Identity;
use crate::error::{AuthSocketError, Result};
use crate::transport::Transport;
use crate::wire::{Envelope, EnvelopeCodec, MessageType};

/// Client handshake progress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// Nothing sent yet
    Init,
    /// `hello` sent, waiting for the challenge
    HelloSent,
    /// Challenge received
    NonceReceived,
    /// Signed `auth` sent, waiting for confirmation
    AuthSent,
    /// Server confirmed; terminal
    Authenticated,
}

/// Drives the client side of one handshake attempt
pub struct ClientHandshake<'a> {
    identity: &'a Identity,
    codec: &'a dyn EnvelopeCodec,
    state: ClientState,
}

impl<'a> ClientHandshake<'a> {
    /// Prepare an attempt signing with `identity`
    pub fn new(identity: &'a Identity, codec: &'a dyn EnvelopeCodec) -> Self {
        ClientHandshake {
            identity,
            codec,
            state: ClientState::Init,
        }
    }

    /// Current state; after a failed [`run`](Self::run) this is the last
    /// state reached
    pub fn state(&self) -> ClientState {
        self.state
    }

    fn advance(&mut self, next: ClientState) {
        debug!(from = ?self.state, to = ?next, "client handshake");
        self.state = next;
    }

    /// Run the attempt to completion or the first error
    pub async fn run(
        &mut self,
        transport: &dyn Transport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.state = ClientState::Init;
        let own_key = *self.identity.public_key();

        send_envelope(transport, self.codec, &Envelope::hello(own_key), cancel).await?;
        self.advance(ClientState::HelloSent);

        let challenge = receive_envelope(transport, self.codec, cancel).await?;
        expect_type(&challenge, MessageType::Nonce)?;
        self.advance(ClientState::NonceReceived);

        let signature = self.identity.sign(&challenge.payload);
        let auth = Envelope::auth(own_key, &challenge.payload, signature);
        send_envelope(transport, self.codec, &auth, cancel).await?;
        self.advance(ClientState::AuthSent);

        let confirmation = receive_envelope(transport, self.codec, cancel).await?;
        match confirmation.kind {
            MessageType::Ok => {
                self.advance(ClientState::Authenticated);
                Ok(())
            }
            MessageType::Error => Err(AuthSocketError::Authentication(format!(
                "rejected by server: {}",
                confirmation.reason()
            ))),
            got => Err(AuthSocketError::Protocol {
                expected: MessageType::Ok,
                got,
            }),
        }
    }
}
