//! X25519 static identities.
//!
//! Public keys travel as standard base64 (32 bytes → 44 characters), the
//! same encoding the configuration file uses.
//!
//! # Example
//!
//! ```
//! use spear_crypto::identity::{decode_public_key, encode_public_key, StaticIdentity};
//!
//! let identity = StaticIdentity::generate();
//! let encoded = encode_public_key(identity.public_key());
//! assert_eq!(decode_public_key(&encoded).unwrap(), *identity.public_key());
//! ```

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::{CryptoError, KEY_SIZE};

/// Long-term X25519 keypair.
///
/// The secret scalar is zeroized on drop by `x25519-dalek`.
pub struct StaticIdentity {
    secret: StaticSecret,
    public: PublicKey,
}

impl StaticIdentity {
    /// Generate a new random identity using the OS CSPRNG.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Create from raw secret key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    /// Create from a slice, rejecting anything that is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))?;
        let identity = Self::from_bytes(key);
        key.zeroize();
        Ok(identity)
    }

    /// Parse a base64-encoded secret key.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?,
        );
        Self::from_slice(&bytes)
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Get the secret key bytes.
    ///
    /// # Security
    /// Handle with care! These bytes can recreate the identity.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Base64 encoding of the secret key, for writing configuration files.
    pub fn secret_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.secret_bytes().as_slice()))
    }
}

impl fmt::Debug for StaticIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StaticIdentity({})", encode_public_key(&self.public))
    }
}

/// Encode a public key as standard base64.
pub fn encode_public_key(key: &PublicKey) -> String {
    STANDARD.encode(key.as_bytes())
}

/// Decode a standard base64 public key.
pub fn decode_public_key(encoded: &str) -> Result<PublicKey, CryptoError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
    public_key_from_slice(&bytes)
}

/// Build a public key from raw bytes, rejecting anything that is not 32 bytes.
pub fn public_key_from_slice(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    let key: [u8; KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))?;
    Ok(PublicKey::from(key))
}
