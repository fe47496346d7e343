//! Cryptographic primitives for authsocket
//!
//! - `identity`: Ed25519 keypairs, hex-encoded public keys and signatures
//! - `error`: crypto failure reasons
//!
//! The handshake only needs `sign` / `verify` and a source of randomness;
//! everything else about the signature scheme stays behind this module.

pub mod error;
pub mod identity;

// Re-export commonly used types
pub use error::{CryptoError, CryptoResult};
pub use identity::{verify, Identity, PublicKey, SignatureBytes, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};

/// Generate cryptographically secure random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Constant-time comparison to prevent timing attacks
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
