//! Spear endpoint.
//!
//! This crate provides:
//! - [`AddressSet`]: candidate addresses, binding, and fan-out writes
//! - [`Peer`] and [`PeerDirectory`]: per-peer keys, buffers, and dispatch
//! - [`Transport`]: the shared socket and its receive loop
//! - The [`AudioCodec`] seam with a raw PCM implementation

#![forbid(unsafe_code)]

pub mod address;
pub mod audio;
pub mod error;
pub mod peer;
pub mod transport;

pub use address::AddressSet;
pub use audio::{AudioCodec, CodecError, RawPcmCodec, ToneGenerator, FRAME_SIZE, SAMPLE_RATE};
pub use error::TransportError;
pub use peer::{Lookup, Peer, PeerDirectory, PeerEntry, PeerStatus, UnknownPeerPolicy};
pub use transport::{DecoderFactory, Transport, TransportConfig};
