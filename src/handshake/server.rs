//! Server role: issue a challenge, verify the signed answer

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{expect_type, receive_envelope, send_envelope, Nonce};
use crate::crypto::{verify, PublicKey};
use crate::error::{AuthSocketError, Result};
use crate::transport::Transport;
use crate::wire::{CodecError, Envelope, EnvelopeCodec, MessageType};

/// Server handshake progress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for `hello`
    Init,
    /// Identity claim recorded
    HelloReceived,
    /// Challenge issued
    NonceSent,
    /// Signed answer received, not yet verified
    AuthReceived,
    /// Verified and confirmed; terminal
    Confirmed,
}

/// Outcome of a successful server handshake
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedPeer {
    /// Key that signed the issued nonce
    pub public_key: PublicKey,
    /// The nonce it signed; spent, kept for auditing
    pub nonce: Nonce,
}

/// Drives the server side of one handshake attempt
pub struct ServerHandshake<'a> {
    codec: &'a dyn EnvelopeCodec,
    state: ServerState,
    claimed: Option<PublicKey>,
    issued: Option<Nonce>,
}

impl<'a> ServerHandshake<'a> {
    /// Prepare an attempt
    pub fn new(codec: &'a dyn EnvelopeCodec) -> Self {
        ServerHandshake {
            codec,
            state: ServerState::Init,
            claimed: None,
            issued: None,
        }
    }

    /// Current state; after a failed [`run`](Self::run) this is the last
    /// state reached
    pub fn state(&self) -> ServerState {
        self.state
    }

    fn advance(&mut self, next: ServerState) {
        debug!(from = ?self.state, to = ?next, "server handshake");
        self.state = next;
    }

    /// Run the attempt to completion or the first error
    ///
    /// A failed verification is answered with an `error` envelope before
    /// the attempt is abandoned.
    pub async fn run(
        &mut self,
        transport: &dyn Transport,
        cancel: &CancellationToken,
    ) -> Result<VerifiedPeer> {
        self.state = ServerState::Init;
        self.claimed = None;
        self.issued = None;

        let hello = receive_envelope(transport, self.codec, cancel).await?;
        expect_type(&hello, MessageType::Hello)?;
        self.claimed = Some(hello.identity_key.ok_or(CodecError::MissingField {
            kind: MessageType::Hello,
            field: "identityKey",
        })?);
        self.advance(ServerState::HelloReceived);

        let nonce = Nonce::generate();
        send_envelope(transport, self.codec, &Envelope::nonce(nonce.as_bytes()), cancel).await?;
        self.issued = Some(nonce);
        self.advance(ServerState::NonceSent);

        let auth = receive_envelope(transport, self.codec, cancel).await?;
        expect_type(&auth, MessageType::Auth)?;
        self.advance(ServerState::AuthReceived);

        let peer = match self.verify(&auth) {
            Ok(peer) => peer,
            Err(reason) => {
                warn!(reason, claimed = ?self.claimed, "handshake rejected");
                let rejection = Envelope::error(reason);
                if let Err(e) = send_envelope(transport, self.codec, &rejection, cancel).await {
                    debug!(error = %e, "could not deliver rejection");
                }
                return Err(AuthSocketError::Authentication(reason.to_string()));
            }
        };

        send_envelope(transport, self.codec, &Envelope::ok(), cancel).await?;
        self.advance(ServerState::Confirmed);
        info!(peer = %peer.public_key, "peer authenticated");

        Ok(peer)
    }

    /// Check the nonce binding and signature, spending the issued nonce
    fn verify(&mut self, auth: &Envelope) -> std::result::Result<VerifiedPeer, &'static str> {
        let nonce = self.issued.take().ok_or("no challenge issued")?;

        if !nonce.matches(&auth.payload) {
            return Err("nonce does not match the issued challenge");
        }

        let key = auth.identity_key.ok_or("auth carries no identity key")?;
        if self.claimed != Some(key) {
            return Err("identity key differs from hello");
        }

        let signature = auth.signature.ok_or("auth carries no signature")?;
        if !verify(nonce.as_bytes(), &signature, &key) {
            return Err("invalid signature");
        }

        Ok(VerifiedPeer {
            public_key: key,
            nonce,
        })
    }
}
