//! JSON configuration for a Spear endpoint.
//!
//! ```json
//! {
//!   "sk": "<base64 secret key>",
//!   "candidates": ["0.0.0.0:15124"],
//!   "peers": [
//!     { "pk": "<base64 public key>", "name": "alice", "candidates": ["192.168.1.4:15124"] }
//!   ]
//! }
//! ```
//!
//! `buffer`, `admit_unknown_addresses`, and each peer's `name` and `volume`
//! are optional.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use spear_core::BufferConfig;
use tracing::debug;

use crate::error::{Error, Result};

/// Length in bytes of every key in the file.
pub const KEY_LEN: usize = 32;

/// A 32-byte key carried as standard base64.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::config(format!("invalid base64 key: {}", e)))?;
        let bytes: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            Error::config(format!("decoded key has byte length {}", decoded.len()))
        })?;
        Ok(Self(bytes))
    }
}

// Secret keys share this type, so never print the bytes.
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Key::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// One remote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub pk: Key,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub candidates: Vec<SocketAddr>,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_volume() -> f32 {
    1.0
}

/// Contents of a Spear configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpearConfig {
    pub sk: Key,
    pub candidates: Vec<SocketAddr>,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Try every peer key on datagrams from unlisted addresses.
    #[serde(default)]
    pub admit_unknown_addresses: bool,
}

impl SpearConfig {
    /// Read and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config = Self::from_json(&data)?;
        debug!(
            "loaded config from {}: {} candidates, {} peers",
            path.display(),
            config.candidates.len(),
            config.peers.len()
        );
        Ok(config)
    }

    /// Parse and validate a configuration document.
    pub fn from_json(data: &str) -> Result<Self> {
        let config: SpearConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.candidates.is_empty() {
            return Err(Error::config("no local candidate addresses"));
        }
        for (index, peer) in self.peers.iter().enumerate() {
            if peer.candidates.is_empty() {
                return Err(Error::config(format!(
                    "peer {} ({}) has no candidate addresses",
                    index,
                    peer.pk.to_base64()
                )));
            }
            if !peer.volume.is_finite() || peer.volume < 0.0 {
                return Err(Error::config(format!(
                    "peer {} has invalid volume {}",
                    index, peer.volume
                )));
            }
        }
        self.buffer.validate().map_err(Error::config)
    }
}
