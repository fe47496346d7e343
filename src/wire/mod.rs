//! Wire envelope and codecs
//!
//! Every message on an authsocket link, handshake or event, is an
//! [`Envelope`]. Two interchangeable encodings exist:
//! - [`JsonCodec`]: tagged JSON object, payload as an array of byte values
//! - [`BinaryCodec`]: length-prefixed binary frame with the same fields
//!
//! A link picks one [`WireFormat`] and sticks with it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::crypto::{CryptoError, PublicKey, SignatureBytes};

pub mod binary;
pub mod json;

pub use binary::BinaryCodec;
pub use json::JsonCodec;

/// Protocol version carried by every envelope
pub const PROTOCOL_VERSION: &str = "1";

/// Size of a handshake nonce in bytes
pub const NONCE_SIZE: usize = 32;

/// Default upper bound for a decoded payload
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 1024 * 1024;

/// Envelope codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input is not a structurally valid envelope
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// The `type` tag is not one this implementation knows
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// The `version` field does not match [`PROTOCOL_VERSION`]
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// A field required by the message type is absent
    #[error("Missing field `{field}` on {kind} message")]
    MissingField {
        /// Message type being decoded
        kind: MessageType,
        /// Name of the absent field
        field: &'static str,
    },

    /// A payload element is not a byte value
    #[error("Payload element {index} out of byte range: {value}")]
    PayloadByteOutOfRange {
        /// Position in the payload
        index: usize,
        /// Offending value
        value: i64,
    },

    /// A field has the wrong length for its message type
    #[error("Invalid {field} length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Field name
        field: &'static str,
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Payload exceeds the configured limit
    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload length, or `max + 1` when decoding stopped at the limit
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Identity key or signature failed to parse
    #[error("Invalid key material: {0}")]
    InvalidKey(#[from] CryptoError),

    /// A `general` payload is not a valid event body
    #[error("Invalid event payload: {0}")]
    InvalidEvent(String),

    /// The envelope cannot be represented in this encoding
    #[error("Cannot encode envelope: {0}")]
    Encode(String),
}

/// Discriminates the handshake steps and post-handshake traffic
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Client announces its identity key
    Hello,
    /// Server challenge
    Nonce,
    /// Client's signed response
    Auth,
    /// Server confirmation
    Ok,
    /// Application event
    General,
    /// Explicit rejection, reason in the payload
    Error,
}

impl MessageType {
    /// Wire name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Hello => "hello",
            MessageType::Nonce => "nonce",
            MessageType::Auth => "auth",
            MessageType::Ok => "ok",
            MessageType::General => "general",
            MessageType::Error => "error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hello" => Ok(MessageType::Hello),
            "nonce" => Ok(MessageType::Nonce),
            "auth" => Ok(MessageType::Auth),
            "ok" => Ok(MessageType::Ok),
            "general" => Ok(MessageType::General),
            "error" => Ok(MessageType::Error),
            other => Err(CodecError::UnknownType(other.to_string())),
        }
    }
}

/// The single message type exchanged on a link
///
/// Optional fields are `None`/empty when absent and are left out of the
/// encoded form entirely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Envelope {
    /// Protocol version
    pub version: String,
    /// Message type
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Sender's public key (`hello`, `auth`)
    #[serde(rename = "identityKey", skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<PublicKey>,
    /// Nonce, echoed nonce, event body or rejection reason
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
    /// Signature over the nonce (`auth`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBytes>,
}

impl Envelope {
    fn new(kind: MessageType) -> Self {
        Envelope {
            version: PROTOCOL_VERSION.to_string(),
            kind,
            identity_key: None,
            payload: Vec::new(),
            signature: None,
        }
    }

    /// `hello` announcing `identity_key`
    pub fn hello(identity_key: PublicKey) -> Self {
        Envelope {
            identity_key: Some(identity_key),
            ..Self::new(MessageType::Hello)
        }
    }

    /// `nonce` challenge
    pub fn nonce(nonce: &[u8]) -> Self {
        Envelope {
            payload: nonce.to_vec(),
            ..Self::new(MessageType::Nonce)
        }
    }

    /// `auth` response echoing `nonce` with its signature
    pub fn auth(identity_key: PublicKey, nonce: &[u8], signature: SignatureBytes) -> Self {
        Envelope {
            identity_key: Some(identity_key),
            payload: nonce.to_vec(),
            signature: Some(signature),
            ..Self::new(MessageType::Auth)
        }
    }

    /// `ok` confirmation
    pub fn ok() -> Self {
        Self::new(MessageType::Ok)
    }

    /// `general` event carrying an encoded event body
    pub fn general(payload: Vec<u8>) -> Self {
        Envelope {
            payload,
            ..Self::new(MessageType::General)
        }
    }

    /// `error` rejection with a human readable reason
    pub fn error(reason: &str) -> Self {
        Envelope {
            payload: reason.as_bytes().to_vec(),
            ..Self::new(MessageType::Error)
        }
    }

    /// Rejection reason of an `error` envelope
    pub fn reason(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Check the version and the fields each message type requires
    pub fn validate(&self, max_payload_len: usize) -> Result<(), CodecError> {
        if self.version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(self.version.clone()));
        }

        if self.payload.len() > max_payload_len {
            return Err(CodecError::PayloadTooLarge {
                len: self.payload.len(),
                max: max_payload_len,
            });
        }

        let missing = |field| CodecError::MissingField {
            kind: self.kind,
            field,
        };

        match self.kind {
            MessageType::Hello => {
                self.identity_key.ok_or_else(|| missing("identityKey"))?;
            }
            MessageType::Nonce => self.require_nonce_payload()?,
            MessageType::Auth => {
                self.identity_key.ok_or_else(|| missing("identityKey"))?;
                self.signature.ok_or_else(|| missing("signature"))?;
                self.require_nonce_payload()?;
            }
            MessageType::General => {
                if self.payload.is_empty() {
                    return Err(missing("payload"));
                }
            }
            MessageType::Ok | MessageType::Error => {}
        }

        Ok(())
    }

    fn require_nonce_payload(&self) -> Result<(), CodecError> {
        if self.payload.is_empty() {
            return Err(CodecError::MissingField {
                kind: self.kind,
                field: "payload",
            });
        }
        if self.payload.len() != NONCE_SIZE {
            return Err(CodecError::InvalidLength {
                field: "payload",
                expected: NONCE_SIZE,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }
}

/// Encodes envelopes to transport bytes and back
///
/// Implementations are pure: no state beyond their limits, no I/O.
pub trait EnvelopeCodec: Send + Sync + fmt::Debug {
    /// Serialize an envelope
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError>;

    /// Parse and validate an envelope
    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError>;
}

/// Which envelope encoding a link uses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// Tagged JSON object
    #[default]
    Json,
    /// Length-prefixed binary frame
    Binary,
}

impl WireFormat {
    /// Build the codec for this format
    pub fn codec(self, max_payload_len: usize) -> Arc<dyn EnvelopeCodec> {
        match self {
            WireFormat::Json => Arc::new(JsonCodec::new(max_payload_len)),
            WireFormat::Binary => Arc::new(BinaryCodec::new(max_payload_len)),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Json => f.write_str("json"),
            WireFormat::Binary => f.write_str("binary"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "binary" => Ok(WireFormat::Binary),
            other => Err(format!("unknown wire format `{}` (expected json or binary)", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Identity;

    #[test]
    fn test_constructors_validate() {
        let id = Identity::generate();
        let nonce = [9u8; NONCE_SIZE];

        let envelopes = vec![
            Envelope::hello(*id.public_key()),
            Envelope::nonce(&nonce),
            Envelope::auth(*id.public_key(), &nonce, id.sign(&nonce)),
            Envelope::ok(),
            Envelope::general(b"{}".to_vec()),
            Envelope::error("nope"),
        ];

        for envelope in envelopes {
            assert!(envelope.validate(DEFAULT_MAX_PAYLOAD_LEN).is_ok(), "{:?}", envelope.kind);
        }
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut hello = Envelope::hello(*Identity::generate().public_key());
        hello.identity_key = None;
        assert_eq!(
            hello.validate(DEFAULT_MAX_PAYLOAD_LEN),
            Err(CodecError::MissingField {
                kind: MessageType::Hello,
                field: "identityKey"
            })
        );

        let general = Envelope::general(Vec::new());
        assert!(matches!(
            general.validate(DEFAULT_MAX_PAYLOAD_LEN),
            Err(CodecError::MissingField { field: "payload", .. })
        ));
    }

    #[test]
    fn test_validate_nonce_length() {
        let short = Envelope::nonce(&[1, 2, 3]);
        assert_eq!(
            short.validate(DEFAULT_MAX_PAYLOAD_LEN),
            Err(CodecError::InvalidLength {
                field: "payload",
                expected: NONCE_SIZE,
                actual: 3
            })
        );
    }

    #[test]
    fn test_validate_version_and_size() {
        let mut ok = Envelope::ok();
        ok.version = "2".to_string();
        assert_eq!(
            ok.validate(DEFAULT_MAX_PAYLOAD_LEN),
            Err(CodecError::UnsupportedVersion("2".to_string()))
        );

        let big = Envelope::general(vec![b'x'; 64]);
        assert_eq!(
            big.validate(16),
            Err(CodecError::PayloadTooLarge { len: 64, max: 16 })
        );
    }

    #[test]
    fn test_message_type_names() {
        for kind in [
            MessageType::Hello,
            MessageType::Nonce,
            MessageType::Auth,
            MessageType::Ok,
            MessageType::General,
            MessageType::Error,
        ] {
            assert_eq!(kind.as_str().parse::<MessageType>().unwrap(), kind);
        }
        assert_eq!(
            "goodbye".parse::<MessageType>(),
            Err(CodecError::UnknownType("goodbye".to_string()))
        );
    }

    #[test]
    fn test_wire_format_parse() {
        assert_eq!("JSON".parse::<WireFormat>().unwrap(), WireFormat::Json);
        assert_eq!("binary".parse::<WireFormat>().unwrap(), WireFormat::Binary);
        assert!("cbor".parse::<WireFormat>().is_err());
    }
}
