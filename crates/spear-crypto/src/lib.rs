//! Cryptographic primitives for Spear.
//!
//! This crate provides:
//! - X25519 static identities
//! - Time-windowed key derivation from a static shared secret
//! - The packet codec: ChaCha20-Poly1305 with MAC-derived nonces
//!
//! # Design
//!
//! There is no handshake. Both sides derive the same 64-byte seed from the
//! X25519 shared point and the sorted pair of public keys, then key every
//! 30-second wall-clock window off that seed:
//!
//! ```text
//! seed      = BLAKE2b-512(dh || max(pk_a, pk_b) || min(pk_a, pk_b))
//! window    = unix_seconds / 30 + offset        offset in {0, -1, +1}
//! key       = BLAKE2b-512-MAC(seed, le64(window))
//! nonce     = BLAKE2b-512-MAC(key[32..], le32(packet_id) || sender_pk)[..12]
//! frame     = le32(packet_id) || ChaCha20-Poly1305(key[..32], nonce, plaintext)
//! ```
//!
//! Receivers try the current window first, then one window back and one
//! ahead, which tolerates roughly 30 seconds of clock skew.
//!
//! # Compatibility
//!
//! Both directions of a pair share each window key, so the nonce mixes in
//! the sender's public key. Peers that derive the nonce from the packet id
//! alone cannot exchange frames with this crate: every frame fails
//! authentication in both directions.

#![forbid(unsafe_code)]

pub mod codec;
pub mod identity;
pub mod key_schedule;

pub use codec::{decrypt, encrypt, PacketCodec};
pub use identity::{decode_public_key, encode_public_key, StaticIdentity};
pub use key_schedule::{derive_seed, derive_window_key, SharedSecretSeed, WindowKey};
pub use x25519_dalek::{PublicKey, StaticSecret};

use thiserror::Error;

/// Size of every X25519 key.
pub const KEY_SIZE: usize = 32;

/// Errors from key handling and packet encryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid key encoding: {0}")]
    InvalidEncoding(String),

    #[error("key exchange produced a non-contributory shared secret")]
    NonContributory,

    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("unable to decrypt frame")]
    DecryptionFailed,
}
