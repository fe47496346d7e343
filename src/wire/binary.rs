//! Length-prefixed binary envelope encoding
//!
//! ```text
//! tag: u8 | version: u16 len + utf8 | identityKey: u16 len + raw
//!         | payload: u32 len + raw | signature: u16 len + raw
//! ```
//!
//! All lengths are little endian. A zero length means the field is absent.

use super::{CodecError, Envelope, EnvelopeCodec, MessageType};
use crate::crypto::{PublicKey, SignatureBytes};

/// Binary frame codec
#[derive(Clone, Debug)]
pub struct BinaryCodec {
    max_payload_len: usize,
}

impl BinaryCodec {
    /// Create a codec rejecting payloads above `max_payload_len` bytes
    pub fn new(max_payload_len: usize) -> Self {
        BinaryCodec { max_payload_len }
    }
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::new(super::DEFAULT_MAX_PAYLOAD_LEN)
    }
}

fn type_tag(kind: MessageType) -> u8 {
    match kind {
        MessageType::Hello => 0x01,
        MessageType::Nonce => 0x02,
        MessageType::Auth => 0x03,
        MessageType::Ok => 0x04,
        MessageType::General => 0x10,
        MessageType::Error => 0xFF,
    }
}

fn type_from_tag(tag: u8) -> Result<MessageType, CodecError> {
    match tag {
        0x01 => Ok(MessageType::Hello),
        0x02 => Ok(MessageType::Nonce),
        0x03 => Ok(MessageType::Auth),
        0x04 => Ok(MessageType::Ok),
        0x10 => Ok(MessageType::General),
        0xFF => Ok(MessageType::Error),
        _ => Err(CodecError::UnknownType(format!("{:#x}", tag))),
    }
}

impl EnvelopeCodec for BinaryCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let identity_key = envelope
            .identity_key
            .as_ref()
            .map(|k| k.as_bytes().as_slice())
            .unwrap_or_default();
        let signature = envelope
            .signature
            .as_ref()
            .map(|s| s.as_bytes().as_slice())
            .unwrap_or_default();

        let mut bytes = Vec::with_capacity(
            1 + 2 + envelope.version.len() + 2 + identity_key.len() + 4
                + envelope.payload.len() + 2 + signature.len(),
        );

        bytes.push(type_tag(envelope.kind));
        write_vec16(&mut bytes, envelope.version.as_bytes(), "version")?;
        write_vec16(&mut bytes, identity_key, "identityKey")?;
        write_vec32(&mut bytes, &envelope.payload)?;
        write_vec16(&mut bytes, signature, "signature")?;

        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        let (&tag, rest) = bytes
            .split_first()
            .ok_or_else(|| CodecError::Malformed("Empty message".to_string()))?;
        let kind = type_from_tag(tag)?;

        let (version, rest) = read_vec16(rest)?;
        let (identity_key, rest) = read_vec16(rest)?;
        let (payload, rest) = read_vec32(rest)?;
        let (signature, rest) = read_vec16(rest)?;

        if !rest.is_empty() {
            return Err(CodecError::Malformed(format!(
                "{} trailing bytes",
                rest.len()
            )));
        }

        if payload.len() > self.max_payload_len {
            return Err(CodecError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_payload_len,
            });
        }

        let version = String::from_utf8(version.to_vec())
            .map_err(|e| CodecError::Malformed(e.to_string()))?;

        let identity_key = if identity_key.is_empty() {
            None
        } else {
            Some(PublicKey::from_bytes(identity_key)?)
        };

        let signature = if signature.is_empty() {
            None
        } else {
            Some(SignatureBytes::from_bytes(signature)?)
        };

        let envelope = Envelope {
            version,
            kind,
            identity_key,
            payload: payload.to_vec(),
            signature,
        };
        envelope.validate(self.max_payload_len)?;

        Ok(envelope)
    }
}

fn write_vec16(out: &mut Vec<u8>, data: &[u8], field: &str) -> Result<(), CodecError> {
    let len = u16::try_from(data.len())
        .map_err(|_| CodecError::Encode(format!("{} longer than {} bytes", field, u16::MAX)))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    Ok(())
}

fn write_vec32(out: &mut Vec<u8>, data: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(data.len())
        .map_err(|_| CodecError::Encode(format!("payload longer than {} bytes", u32::MAX)))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    Ok(())
}

/// Read a length-prefixed slice (16-bit length)
fn read_vec16(bytes: &[u8]) -> Result<(&[u8], &[u8]), CodecError> {
    if bytes.len() < 2 {
        return Err(CodecError::Malformed("Not enough data".to_string()));
    }

    let len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let rest = &bytes[2..];

    if rest.len() < len {
        return Err(CodecError::Malformed("Not enough data".to_string()));
    }

    Ok(rest.split_at(len))
}

/// Read a length-prefixed slice (32-bit length)
fn read_vec32(bytes: &[u8]) -> Result<(&[u8], &[u8]), CodecError> {
    if bytes.len() < 4 {
        return Err(CodecError::Malformed("Not enough data".to_string()));
    }

    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let rest = &bytes[4..];

    if rest.len() < len {
        return Err(CodecError::Malformed("Not enough data".to_string()));
    }

    Ok(rest.split_at(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Identity;
    use crate::wire::NONCE_SIZE;

    #[test]
    fn test_roundtrip_auth_and_ok() {
        let codec = BinaryCodec::default();
        let id = Identity::generate();
        let nonce: [u8; NONCE_SIZE] = crate::crypto::random_bytes();

        for envelope in [
            Envelope::auth(*id.public_key(), &nonce, id.sign(&nonce)),
            Envelope::ok(),
        ] {
            let bytes = codec.encode(&envelope).unwrap();
            assert_eq!(codec.decode(&bytes).unwrap(), envelope);
        }
    }

    #[test]
    fn test_ok_frame_layout() {
        let bytes = BinaryCodec::default().encode(&Envelope::ok()).unwrap();
        assert_eq!(bytes, vec![0x04, 1, 0, b'1', 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_rejects_unknown_tag() {
        let mut bytes = BinaryCodec::default().encode(&Envelope::ok()).unwrap();
        bytes[0] = 0x42;
        assert_eq!(
            BinaryCodec::default().decode(&bytes),
            Err(CodecError::UnknownType("0x42".to_string()))
        );
    }

    #[test]
    fn test_rejects_truncated_and_trailing() {
        let codec = BinaryCodec::default();
        let bytes = codec.encode(&Envelope::nonce(&[5u8; NONCE_SIZE])).unwrap();

        assert!(matches!(codec.decode(&[]), Err(CodecError::Malformed(_))));
        assert!(matches!(
            codec.decode(&bytes[..bytes.len() - 3]),
            Err(CodecError::Malformed(_))
        ));

        let mut padded = bytes.clone();
        padded.push(0);
        assert!(matches!(codec.decode(&padded), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_rejects_wrong_key_length() {
        let mut bytes = vec![0x01];
        write_vec16(&mut bytes, b"1", "version").unwrap();
        write_vec16(&mut bytes, &[1, 2, 3], "identityKey").unwrap();
        write_vec32(&mut bytes, &[]).unwrap();
        write_vec16(&mut bytes, &[], "signature").unwrap();

        assert!(matches!(
            BinaryCodec::default().decode(&bytes),
            Err(CodecError::InvalidKey(_))
        ));
    }
}
