//! Time-windowed key derivation.
//!
//! The shared seed depends only on the unordered pair of public keys, so
//! both peers compute it independently. Window keys are recomputed for every
//! encrypt/decrypt call and zeroized when dropped.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use blake2::digest::Mac;
use blake2::{Blake2b512, Blake2bMac512, Digest};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{CryptoError, KEY_SIZE};

/// Length of one key window in seconds.
pub const WINDOW_SECONDS: u64 = 30;

/// Window offsets tried on decrypt, in order.
pub const WINDOW_OFFSETS: [i64; 3] = [0, -1, 1];

/// Size of the shared seed and of every BLAKE2b-512 output.
pub const SEED_SIZE: usize = 64;

/// Root key material for one peer pair.
pub struct SharedSecretSeed(Zeroizing<[u8; SEED_SIZE]>);

impl SharedSecretSeed {
    pub fn as_bytes(&self) -> &[u8; SEED_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedSecretSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecretSeed(..)")
    }
}

/// Cipher and nonce-derivation keys for a single window.
pub struct WindowKey {
    cipher_key: Zeroizing<[u8; KEY_SIZE]>,
    mac_key: Zeroizing<[u8; KEY_SIZE]>,
}

impl WindowKey {
    pub fn cipher_key(&self) -> &[u8; KEY_SIZE] {
        &self.cipher_key
    }

    pub fn mac_key(&self) -> &[u8; KEY_SIZE] {
        &self.mac_key
    }
}

impl fmt::Debug for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WindowKey(..)")
    }
}

/// Derive the seed shared by `local_secret` and the owner of `peer_public`.
///
/// Fails only when the X25519 output is degenerate, i.e. the peer key is a
/// low-order point. Callers should treat that as a configuration error.
pub fn derive_seed(
    peer_public: &PublicKey,
    local_secret: &StaticSecret,
) -> Result<SharedSecretSeed, CryptoError> {
    let local_public = PublicKey::from(local_secret);
    let shared = local_secret.diffie_hellman(peer_public);
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }

    // Larger key first so both sides hash the same bytes.
    let (high, low) = if peer_public.as_bytes() >= local_public.as_bytes() {
        (peer_public.as_bytes(), local_public.as_bytes())
    } else {
        (local_public.as_bytes(), peer_public.as_bytes())
    };

    let mut hasher = Blake2b512::new();
    hasher.update(shared.as_bytes());
    hasher.update(high);
    hasher.update(low);

    let mut seed = Zeroizing::new([0u8; SEED_SIZE]);
    seed.copy_from_slice(&hasher.finalize());
    Ok(SharedSecretSeed(seed))
}

/// Derive the key pair for the current window shifted by `offset`.
pub fn derive_window_key(seed: &SharedSecretSeed, offset: i64) -> Result<WindowKey, CryptoError> {
    derive_window_key_at(seed, unix_now(), offset)
}

/// Derive the key pair for the window containing `unix_seconds`, shifted by `offset`.
pub fn derive_window_key_at(
    seed: &SharedSecretSeed,
    unix_seconds: u64,
    offset: i64,
) -> Result<WindowKey, CryptoError> {
    let window = window_index(unix_seconds, offset);
    let key = mac512(seed.as_bytes(), &window.to_le_bytes())?;

    let mut cipher_key = Zeroizing::new([0u8; KEY_SIZE]);
    let mut mac_key = Zeroizing::new([0u8; KEY_SIZE]);
    cipher_key.copy_from_slice(&key[..KEY_SIZE]);
    mac_key.copy_from_slice(&key[KEY_SIZE..]);

    Ok(WindowKey {
        cipher_key,
        mac_key,
    })
}

/// Window number for `unix_seconds`, shifted by `offset`.
pub fn window_index(unix_seconds: u64, offset: i64) -> u64 {
    ((unix_seconds / WINDOW_SECONDS) as i64).wrapping_add(offset) as u64
}

/// Current wall-clock time in whole seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Keyed BLAKE2b-512.
pub(crate) fn mac512(
    key: &[u8],
    message: &[u8],
) -> Result<Zeroizing<[u8; SEED_SIZE]>, CryptoError> {
    let mut mac =
        Blake2bMac512::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    mac.update(message);

    let mut out = Zeroizing::new([0u8; SEED_SIZE]);
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}
