//! Ed25519 signing identities
//!
//! An [`Identity`] is the keypair a peer proves possession of during the
//! handshake. Only the public half ever leaves the process, always as hex.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use super::error::{CryptoError, CryptoResult};

/// Size of a public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a secret seed in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of a signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Size of a key file: seed followed by public key
pub const KEY_FILE_SIZE: usize = SECRET_KEY_SIZE + PUBLIC_KEY_SIZE;

/// Fixed-size byte strings that travel as lowercase hex
macro_rules! hex_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Copy from a slice of exactly the right length
            pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
                <[u8; $len]>::try_from(bytes)
                    .map($name)
                    .map_err(|_| CryptoError::WrongLength {
                        what: $what,
                        expected: $len,
                        actual: bytes.len(),
                    })
            }

            /// Raw bytes
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Lowercase hex, as sent on the wire
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse wire hex
            pub fn from_hex(s: &str) -> CryptoResult<Self> {
                let bytes = hex::decode(s).map_err(|_| CryptoError::NotHex { what: $what })?;
                Self::from_bytes(&bytes)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}...)", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_bytes!(
    /// Public half of an identity; the identity a peer is known by
    PublicKey,
    PUBLIC_KEY_SIZE,
    "public key"
);

hex_bytes!(
    /// Signature produced by an [`Identity`]
    SignatureBytes,
    SIGNATURE_SIZE,
    "signature"
);

impl PublicKey {
    /// Check `signature` over `message` against this key
    ///
    /// Uses strict verification, so malleable and small-order forms are
    /// refused.
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> CryptoResult<()> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::NotOnCurve)?;
        key.verify_strict(message, &Signature::from_bytes(&signature.0))
            .map_err(|_| CryptoError::BadSignature)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Verify `signature` over `message` with `public_key`.
///
/// Returns `false` for any failure, including a public key that is not a
/// valid curve point.
pub fn verify(message: &[u8], signature: &SignatureBytes, public_key: &PublicKey) -> bool {
    public_key.verify(message, signature).is_ok()
}

/// A signing keypair
///
/// The secret half is wiped when dropped and has no serialized form other
/// than [`to_bytes`](Self::to_bytes) for key files.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    public_key: PublicKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Create from a 32-byte secret seed
    pub fn from_seed(seed: &[u8; SECRET_KEY_SIZE]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    /// Create from a hex-encoded 32-byte secret seed
    pub fn from_secret_hex(s: &str) -> CryptoResult<Self> {
        let bytes = Zeroizing::new(
            hex::decode(s.trim()).map_err(|_| CryptoError::NotHex { what: "secret key" })?,
        );
        let seed: &[u8; SECRET_KEY_SIZE] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::WrongLength {
                    what: "secret key",
                    expected: SECRET_KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self::from_seed(seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = PublicKey(signing_key.verifying_key().to_bytes());
        Identity {
            signing_key,
            public_key,
        }
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes(self.signing_key.sign(message).to_bytes())
    }

    /// Key file contents: seed followed by public key
    ///
    /// WARNING: This exposes the secret key. Handle with extreme care.
    pub fn to_bytes(&self) -> Zeroizing<[u8; KEY_FILE_SIZE]> {
        let mut bytes = Zeroizing::new([0u8; KEY_FILE_SIZE]);
        bytes[..SECRET_KEY_SIZE].copy_from_slice(self.signing_key.as_bytes());
        bytes[SECRET_KEY_SIZE..].copy_from_slice(self.public_key.as_bytes());
        bytes
    }

    /// Load key file contents written by [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_FILE_SIZE {
            return Err(CryptoError::WrongLength {
                what: "key file",
                expected: KEY_FILE_SIZE,
                actual: bytes.len(),
            });
        }

        let mut seed = Zeroizing::new([0u8; SECRET_KEY_SIZE]);
        seed.copy_from_slice(&bytes[..SECRET_KEY_SIZE]);
        let identity = Self::from_seed(&seed);

        if identity.public_key.as_bytes()[..] != bytes[SECRET_KEY_SIZE..] {
            return Err(CryptoError::KeyFileMismatch);
        }
        Ok(identity)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}
