//! Link configuration shared by clients and servers

use std::sync::Arc;
use std::time::Duration;

use crate::wire::{EnvelopeCodec, WireFormat, DEFAULT_MAX_PAYLOAD_LEN};

/// Default deadline for a complete handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings both ends of a link must agree on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Deadline for the whole four-message handshake
    pub handshake_timeout: Duration,
    /// Envelope encoding used on the link
    pub wire_format: WireFormat,
    /// Largest payload accepted on decode
    pub max_payload_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            wire_format: WireFormat::default(),
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl Config {
    /// Set the handshake deadline
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the wire format
    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    /// Set the payload limit
    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Codec for the configured wire format and limit
    pub fn codec(&self) -> Arc<dyn EnvelopeCodec> {
        self.wire_format.codec(self.max_payload_len)
    }
}
