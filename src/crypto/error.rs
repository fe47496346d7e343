//! Key and signature errors

use thiserror::Error;

/// Why key material or a signature was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Raw bytes of the wrong size
    #[error("{what} must be {expected} bytes, got {actual}")]
    WrongLength {
        /// Which value was being decoded
        what: &'static str,
        /// Required size in bytes
        expected: usize,
        /// Size supplied
        actual: usize,
    },

    /// Text that is not hex
    #[error("{what} is not valid hex")]
    NotHex {
        /// Which value was being decoded
        what: &'static str,
    },

    /// 32 bytes that do not decode to an Ed25519 point
    #[error("Public key is not a valid Ed25519 point")]
    NotOnCurve,

    /// A key file whose stored public half does not belong to its secret
    #[error("Key file public half does not match its secret half")]
    KeyFileMismatch,

    /// The signature does not verify under the given key
    #[error("Signature verification failed")]
    BadSignature,
}

/// Result type for key and signature handling
pub type CryptoResult<T> = Result<T, CryptoError>;
