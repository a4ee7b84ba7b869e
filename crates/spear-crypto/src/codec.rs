//! Packet encryption and wire framing.
//!
//! # Wire Format
//!
//! ```text
//! [4 bytes: packet_id, little-endian] [ciphertext] [16 bytes: Poly1305 tag]
//! ```
//!
//! The packet id is sent in the clear. The nonce is never sent: both sides
//! recompute it from the window's MAC key, the packet id, and the sender's
//! public key. Both directions of a pair share one window key, so the
//! sender key keeps A→B packet 0 and B→A packet 0 on different nonces. A
//! packet id must never repeat within one window for a given direction.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::identity::StaticIdentity;
use crate::key_schedule::{
    derive_seed, derive_window_key_at, mac512, unix_now, SharedSecretSeed, WindowKey,
    WINDOW_OFFSETS,
};
use crate::{CryptoError, KEY_SIZE};
use x25519_dalek::{PublicKey, StaticSecret};

/// Size of the ChaCha20-Poly1305 nonce.
pub const NONCE_SIZE: usize = 12;
/// Size of the Poly1305 tag appended to every ciphertext.
pub const TAG_SIZE: usize = 16;
/// Size of the cleartext packet id prefix.
pub const PACKET_ID_SIZE: usize = 4;
/// Smallest frame that can possibly decrypt (empty plaintext).
pub const MIN_FRAME_SIZE: usize = PACKET_ID_SIZE + TAG_SIZE;

/// Encrypts and decrypts frames for one peer pair.
///
/// Holds the pair's shared seed so the X25519 exchange runs once per peer
/// rather than once per packet.
#[derive(Debug)]
pub struct PacketCodec {
    seed: SharedSecretSeed,
    local_public: PublicKey,
    peer_public: PublicKey,
}

impl PacketCodec {
    /// Build a codec between `local` and the owner of `peer_public`.
    pub fn new(local: &StaticIdentity, peer_public: &PublicKey) -> Result<Self, CryptoError> {
        Self::from_secret(local.secret(), peer_public)
    }

    fn from_secret(
        local_secret: &StaticSecret,
        peer_public: &PublicKey,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            seed: derive_seed(peer_public, local_secret)?,
            local_public: PublicKey::from(local_secret),
            peer_public: *peer_public,
        })
    }

    pub fn peer_public(&self) -> &PublicKey {
        &self.peer_public
    }

    /// Encrypt `plaintext` under the current window.
    pub fn seal(&self, packet_id: u32, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.seal_at(unix_now(), packet_id, plaintext)
    }

    /// Encrypt `plaintext` under the window containing `unix_seconds`.
    pub fn seal_at(
        &self,
        unix_seconds: u64,
        packet_id: u32,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key = derive_window_key_at(&self.seed, unix_seconds, 0)?;
        let nonce = packet_nonce(&key, packet_id, &self.local_public)?;

        let ciphertext = cipher_for(&key)
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut frame = Vec::with_capacity(PACKET_ID_SIZE + ciphertext.len());
        frame.extend_from_slice(&packet_id.to_le_bytes());
        frame.extend_from_slice(&ciphertext);
        Ok(frame)
    }

    /// Decrypt a frame, trying the current window and its two neighbours.
    pub fn open(&self, frame: &[u8]) -> Result<(u32, Vec<u8>), CryptoError> {
        self.open_at(unix_now(), frame)
    }

    /// Decrypt a frame as if the local clock read `unix_seconds`.
    pub fn open_at(&self, unix_seconds: u64, frame: &[u8]) -> Result<(u32, Vec<u8>), CryptoError> {
        if frame.len() < MIN_FRAME_SIZE {
            return Err(CryptoError::FrameTooShort(frame.len()));
        }

        let packet_id = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let ciphertext = &frame[PACKET_ID_SIZE..];

        for offset in WINDOW_OFFSETS {
            let key = derive_window_key_at(&self.seed, unix_seconds, offset)?;
            let nonce = packet_nonce(&key, packet_id, &self.peer_public)?;
            if let Ok(plaintext) = cipher_for(&key).decrypt(&nonce, ciphertext) {
                return Ok((packet_id, plaintext));
            }
        }

        Err(CryptoError::DecryptionFailed)
    }
}

/// Encrypt a single packet for `peer_public`.
///
/// Derives the seed on every call; long-lived callers should hold a
/// [`PacketCodec`] instead.
pub fn encrypt(
    peer_public: &PublicKey,
    local_secret: &StaticSecret,
    plaintext: &[u8],
    packet_id: u32,
) -> Result<Vec<u8>, CryptoError> {
    PacketCodec::from_secret(local_secret, peer_public)?.seal(packet_id, plaintext)
}

/// Decrypt a single frame sent by the owner of `peer_public`.
pub fn decrypt(
    frame: &[u8],
    peer_public: &PublicKey,
    local_secret: &StaticSecret,
) -> Result<(u32, Vec<u8>), CryptoError> {
    PacketCodec::from_secret(local_secret, peer_public)?.open(frame)
}

fn cipher_for(key: &WindowKey) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(key.cipher_key()))
}

fn packet_nonce(
    key: &WindowKey,
    packet_id: u32,
    sender: &PublicKey,
) -> Result<Nonce, CryptoError> {
    let mut message = [0u8; PACKET_ID_SIZE + KEY_SIZE];
    message[..PACKET_ID_SIZE].copy_from_slice(&packet_id.to_le_bytes());
    message[PACKET_ID_SIZE..].copy_from_slice(sender.as_bytes());

    let digest = mac512(key.mac_key(), &message)?;
    Ok(*Nonce::from_slice(&digest[..NONCE_SIZE]))
}
