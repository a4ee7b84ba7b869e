//! Core Spear types: payload framing, packets, and reception buffering.
//!
//! This crate provides:
//! - The plaintext payload discriminator (audio vs. video)
//! - [`Packet`], a decrypted datagram plus receipt metadata
//! - [`ReceptionBuffer`], the per-peer jitter buffer

#![forbid(unsafe_code)]

pub mod buffer;

pub use buffer::{BufferConfig, BufferConfigError, BufferPhase, ReceptionBuffer};

use std::sync::OnceLock;
use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};

/// Largest datagram the receive loop will read. Fits an uncompressed
/// 60 ms audio frame.
pub const MAX_DATAGRAM_SIZE: usize = 0x10000;

/// Discriminator byte for audio payloads.
pub const AUDIO_PAYLOAD: u8 = 0x00;
/// Discriminator byte for video payloads.
pub const VIDEO_PAYLOAD: u8 = 0x01;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("empty payload")]
    Empty,
    #[error("unsupported payload type: 0x{0:02x}")]
    Unsupported(u8),
}

/// Decrypted application payload, split on its leading type byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Codec-compressed audio frame.
    Audio(Bytes),
    /// Encoded video frame. Carried but not interpreted by the transport.
    Video(Bytes),
}

impl Payload {
    /// Parse a plaintext produced by the packet codec.
    pub fn parse(plaintext: Bytes) -> Result<Self, PayloadError> {
        let kind = *plaintext.first().ok_or(PayloadError::Empty)?;
        let body = plaintext.slice(1..);
        match kind {
            AUDIO_PAYLOAD => Ok(Payload::Audio(body)),
            VIDEO_PAYLOAD => Ok(Payload::Video(body)),
            other => Err(PayloadError::Unsupported(other)),
        }
    }

    pub fn kind(&self) -> u8 {
        match self {
            Payload::Audio(_) => AUDIO_PAYLOAD,
            Payload::Video(_) => VIDEO_PAYLOAD,
        }
    }

    pub fn body(&self) -> &Bytes {
        match self {
            Payload::Audio(body) | Payload::Video(body) => body,
        }
    }

    /// Serialize back into discriminator + body form.
    pub fn encode(&self) -> Bytes {
        let body = self.body();
        let mut buf = BytesMut::with_capacity(1 + body.len());
        buf.put_u8(self.kind());
        buf.put_slice(body);
        buf.freeze()
    }
}

/// A decrypted inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u32,
    pub data: Bytes,
    /// Monotonic receipt time, see [`monotonic_ms`].
    pub received_ms: u64,
}

impl Packet {
    pub fn new(id: u32, data: Bytes) -> Self {
        Self {
            id,
            data,
            received_ms: monotonic_ms(),
        }
    }

    pub fn with_time(id: u32, data: Bytes, received_ms: u64) -> Self {
        Self {
            id,
            data,
            received_ms,
        }
    }
}

/// Milliseconds elapsed on a process-wide monotonic clock.
pub fn monotonic_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}
