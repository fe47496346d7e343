//! Tagged JSON envelope encoding
//!
//! ```text
//! {"version":"1","type":"auth","identityKey":"<hex>","payload":[12,250,...],"signature":"<hex>"}
//! ```
//!
//! The payload is an array of integers so it survives any JSON stack
//! bit-exactly. Absent fields are omitted. Decoding reads the payload
//! element by element and stops at the configured limit.

use std::fmt;

use serde::de::{self, DeserializeSeed, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::value::RawValue;

use super::{CodecError, Envelope, EnvelopeCodec, MessageType};
use crate::crypto::{PublicKey, SignatureBytes};

/// JSON envelope codec
#[derive(Clone, Debug)]
pub struct JsonCodec {
    max_payload_len: usize,
}

impl JsonCodec {
    /// Create a codec rejecting payloads above `max_payload_len` bytes
    pub fn new(max_payload_len: usize) -> Self {
        JsonCodec { max_payload_len }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(super::DEFAULT_MAX_PAYLOAD_LEN)
    }
}

/// Loosely typed mirror of the wire object, checked field by field
///
/// The payload is kept as unparsed JSON text and decoded by [`PayloadSeed`].
#[derive(Deserialize)]
struct RawEnvelope<'a> {
    version: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "identityKey")]
    identity_key: Option<String>,
    #[serde(alias = "nonce", borrow)]
    payload: Option<&'a RawValue>,
    signature: Option<String>,
}

/// Bounded decoder for the payload integer array
///
/// Range and length failures are recorded in `rejected` so the caller gets
/// the precise [`CodecError`] instead of a serde message.
struct PayloadSeed<'r> {
    max: usize,
    rejected: &'r mut Option<CodecError>,
}

impl<'de, 'r> DeserializeSeed<'de> for PayloadSeed<'r> {
    type Value = Vec<u8>;

    fn deserialize<D>(self, deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, 'r> Visitor<'de> for PayloadSeed<'r> {
    type Value = Vec<u8>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of byte values")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(self.max));

        while let Some(value) = seq.next_element::<i64>()? {
            let index = bytes.len();
            if index == self.max {
                *self.rejected = Some(CodecError::PayloadTooLarge {
                    len: index + 1,
                    max: self.max,
                });
                return Err(de::Error::custom("payload too large"));
            }
            match u8::try_from(value) {
                Ok(byte) => bytes.push(byte),
                Err(_) => {
                    *self.rejected = Some(CodecError::PayloadByteOutOfRange { index, value });
                    return Err(de::Error::custom("payload byte out of range"));
                }
            }
        }

        Ok(bytes)
    }
}

fn decode_payload(raw: &RawValue, max: usize) -> Result<Vec<u8>, CodecError> {
    let mut rejected = None;
    let mut deserializer = serde_json::Deserializer::from_str(raw.get());
    let decoded = PayloadSeed {
        max,
        rejected: &mut rejected,
    }
    .deserialize(&mut deserializer);

    decoded.map_err(|e| rejected.unwrap_or_else(|| CodecError::Malformed(e.to_string())))
}

impl EnvelopeCodec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(envelope).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        let raw: RawEnvelope =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;

        let kind: MessageType = raw
            .kind
            .ok_or_else(|| CodecError::Malformed("missing `type`".to_string()))?
            .parse()?;

        let version = raw
            .version
            .ok_or_else(|| CodecError::Malformed("missing `version`".to_string()))?;

        let payload = match raw.payload {
            Some(values) => decode_payload(values, self.max_payload_len)?,
            None => Vec::new(),
        };

        let identity_key = raw
            .identity_key
            .as_deref()
            .map(PublicKey::from_hex)
            .transpose()?;

        let signature = raw
            .signature
            .as_deref()
            .map(SignatureBytes::from_hex)
            .transpose()?;

        let envelope = Envelope {
            version,
            kind,
            identity_key,
            payload,
            signature,
        };
        envelope.validate(self.max_payload_len)?;

        Ok(envelope)
    }
}
