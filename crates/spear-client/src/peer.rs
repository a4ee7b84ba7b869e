//! Remote peers and the directory that matches datagrams to them.
//!
//! # Thread Safety
//!
//! A [`Peer`] is shared between the receive loop and any number of senders.
//! The packet codec is immutable after construction and the outbound id is
//! an atomic counter; everything else sits behind one short-lived mutex that
//! is never held across an `.await`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use spear_core::{BufferConfig, Packet, ReceptionBuffer};
use spear_crypto::{encode_public_key, CryptoError, PacketCodec, PublicKey, StaticIdentity};
use tracing::debug;

use crate::address::AddressSet;
use crate::audio::{AudioCodec, CodecError};
use crate::error::TransportError;

/// How recently a packet must have arrived for a peer to count as connected.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Connected,
    Timeout,
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerStatus::Connected => f.write_str("connected"),
            PeerStatus::Timeout => f.write_str("timeout"),
        }
    }
}

/// Static description of a remote peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub public_key: PublicKey,
    pub name: Option<String>,
    pub candidates: Vec<SocketAddr>,
    pub volume: f32,
}

impl PeerEntry {
    pub fn new(public_key: PublicKey, candidates: Vec<SocketAddr>) -> Self {
        Self {
            public_key,
            name: None,
            candidates,
            volume: 1.0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

struct PeerState {
    addr: AddressSet,
    buffer: ReceptionBuffer,
    decoder: Box<dyn AudioCodec>,
    volume: f32,
    last_received: Option<Instant>,
    highest_received: Option<u32>,
}

/// A remote endpoint we exchange encrypted packets with.
pub struct Peer {
    public_key: PublicKey,
    name: Option<String>,
    codec: PacketCodec,
    next_packet_id: AtomicU32,
    state: Mutex<PeerState>,
}

impl Peer {
    /// Build a peer, deriving its shared seed against `local`.
    ///
    /// Fails if the peer key is degenerate or the buffer config is invalid.
    pub fn new(
        local: &StaticIdentity,
        entry: PeerEntry,
        buffer: BufferConfig,
        decoder: Box<dyn AudioCodec>,
    ) -> Result<Self, TransportError> {
        let codec = PacketCodec::new(local, &entry.public_key)?;
        let buffer = ReceptionBuffer::new(buffer)?;

        Ok(Self {
            public_key: entry.public_key,
            name: entry.name,
            codec,
            next_packet_id: AtomicU32::new(0),
            state: Mutex::new(PeerState {
                addr: AddressSet::new(entry.candidates),
                buffer,
                decoder,
                volume: entry.volume,
                last_received: None,
                highest_received: None,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, PeerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Configured name, or the base64 public key.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => encode_public_key(&self.public_key),
        }
    }

    pub fn status(&self) -> PeerStatus {
        self.status_at(Instant::now())
    }

    pub fn status_at(&self, now: Instant) -> PeerStatus {
        match self.state().last_received {
            Some(at) if now.saturating_duration_since(at) < PEER_TIMEOUT => PeerStatus::Connected,
            _ => PeerStatus::Timeout,
        }
    }

    pub fn last_received(&self) -> Option<Instant> {
        self.state().last_received
    }

    pub fn volume(&self) -> f32 {
        self.state().volume
    }

    pub fn set_volume(&self, volume: f32) {
        self.state().volume = volume.max(0.0);
    }

    /// Reserve the next outbound packet id.
    pub fn next_packet_id(&self) -> u32 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Snapshot of this peer's addresses, safe to use across an `.await`.
    pub fn address_set(&self) -> AddressSet {
        self.state().addr.clone()
    }

    pub fn confirmed_addr(&self) -> Option<SocketAddr> {
        self.state().addr.confirmed()
    }

    /// True if `addr` is a candidate or the confirmed address.
    pub fn recognizes(&self, addr: SocketAddr) -> bool {
        self.state().addr.recognizes(addr)
    }

    pub(crate) fn seal(&self, packet_id: u32, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.codec.seal(packet_id, plaintext)
    }

    pub(crate) fn open(&self, frame: &[u8]) -> Result<(u32, Vec<u8>), CryptoError> {
        self.codec.open(frame)
    }

    pub(crate) fn try_write(&self, socket: &tokio::net::UdpSocket, frame: &[u8]) -> usize {
        self.state().addr.try_write(socket, frame)
    }

    /// Note an authenticated packet from `from`.
    ///
    /// Only an id above every id seen so far moves the confirmed address or
    /// refreshes liveness, so a replayed frame cannot redirect traffic. After
    /// [`PEER_TIMEOUT`] of silence any id is taken again, which picks up a
    /// sender that restarted its counter. Returns false for a stale id.
    pub(crate) fn record_receipt(&self, packet_id: u32, from: SocketAddr) -> bool {
        self.record_receipt_at(packet_id, from, Instant::now())
    }

    fn record_receipt_at(&self, packet_id: u32, from: SocketAddr, now: Instant) -> bool {
        let mut state = self.state();
        let fresh = match (state.highest_received, state.last_received) {
            (Some(highest), Some(at)) if now.saturating_duration_since(at) < PEER_TIMEOUT => {
                packet_id > highest
            }
            _ => true,
        };
        if !fresh {
            return false;
        }

        state.addr.confirm(from);
        state.last_received = Some(now);
        state.highest_received = Some(packet_id);
        true
    }

    pub(crate) fn push_audio(&self, packet_id: u32, data: Bytes) {
        self.state().buffer.push(Packet::new(packet_id, data));
    }

    /// Pop and decode the next audio frame.
    ///
    /// Returns `Ok(None)` while the buffer is still filling. A skipped id
    /// is handed to the decoder as a lost frame.
    pub fn next_audio_frame(&self) -> Result<Option<Vec<f32>>, CodecError> {
        let mut state = self.state();
        let state = &mut *state;

        let was_waiting = state.buffer.next_expected();
        match state.buffer.pop() {
            Some(packet) => state.decoder.decompress(Some(&packet.data[..])).map(Some),
            // A gap only counts as loss once playback has started.
            None if was_waiting.is_some() && state.buffer.next_expected() != was_waiting => {
                debug!("concealing lost frame from {}", self.display_name());
                state.decoder.decompress(None).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn buffered(&self) -> usize {
        self.state().buffer.len()
    }

    pub fn reset_buffer(&self) {
        self.state().buffer.reset();
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("public_key", &encode_public_key(&self.public_key))
            .field("name", &self.name)
            .field("next_packet_id", &self.next_packet_id.load(Ordering::Relaxed))
            .finish()
    }
}

/// What the directory knows about a datagram's source address.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Peers that list or have confirmed this address. Usually one.
    Known(Vec<Arc<Peer>>),
    /// No peer claims this address.
    Unknown(SocketAddr),
}

/// What to do with datagrams from addresses no peer claims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownPeerPolicy {
    /// Ignore them.
    #[default]
    Drop,
    /// Try every known key; a success confirms the new address for that peer.
    TryKnownKeys,
}

/// Immutable set of configured peers.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: Vec<Arc<Peer>>,
}

impl PeerDirectory {
    pub fn new(peers: Vec<Arc<Peer>>) -> Self {
        Self { peers }
    }

    pub fn lookup(&self, addr: SocketAddr) -> Lookup {
        let matched: Vec<Arc<Peer>> = self
            .peers
            .iter()
            .filter(|peer| peer.recognizes(addr))
            .cloned()
            .collect();

        if matched.is_empty() {
            Lookup::Unknown(addr)
        } else {
            Lookup::Known(matched)
        }
    }

    pub fn by_public_key(&self, key: &PublicKey) -> Option<Arc<Peer>> {
        self.peers
            .iter()
            .find(|peer| peer.public_key() == key)
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Peer>> {
        self.peers.iter()
    }

    pub fn all(&self) -> Vec<Arc<Peer>> {
        self.peers.clone()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{RawPcmCodec, FRAME_SIZE};
    use std::collections::HashSet;
    use std::thread;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn make_peer(local: &StaticIdentity, candidates: Vec<SocketAddr>) -> Arc<Peer> {
        let remote = StaticIdentity::generate();
        let entry = PeerEntry::new(*remote.public_key(), candidates);
        Arc::new(
            Peer::new(
                local,
                entry,
                BufferConfig::default(),
                Box::new(RawPcmCodec::new()),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_lookup_listed_and_unlisted() {
        let local = StaticIdentity::generate();
        let a = make_peer(&local, vec![addr("10.0.0.1:5000")]);
        let b = make_peer(&local, vec![addr("10.0.0.2:5000"), addr("10.0.0.3:5000")]);
        let directory = PeerDirectory::new(vec![a.clone(), b.clone()]);

        match directory.lookup(addr("10.0.0.3:5000")) {
            Lookup::Known(peers) => {
                assert_eq!(peers.len(), 1);
                assert_eq!(peers[0].public_key(), b.public_key());
            }
            Lookup::Unknown(_) => panic!("listed address was not found"),
        }

        assert!(matches!(
            directory.lookup(addr("10.0.0.9:5000")),
            Lookup::Unknown(x) if x == addr("10.0.0.9:5000")
        ));
    }

    #[test]
    fn test_lookup_follows_confirmed_address() {
        let local = StaticIdentity::generate();
        let peer = make_peer(&local, vec![addr("10.0.0.1:5000")]);
        let directory = PeerDirectory::new(vec![peer.clone()]);

        let rebound = addr("198.51.100.7:40000");
        assert!(matches!(directory.lookup(rebound), Lookup::Unknown(_)));

        assert!(peer.record_receipt(0, rebound));
        assert!(matches!(directory.lookup(rebound), Lookup::Known(_)));
        assert_eq!(peer.address_set().targets(), vec![rebound]);
    }

    #[test]
    fn test_by_public_key() {
        let local = StaticIdentity::generate();
        let peer = make_peer(&local, vec![addr("10.0.0.1:5000")]);
        let directory = PeerDirectory::new(vec![peer.clone()]);

        assert!(directory.by_public_key(peer.public_key()).is_some());
        assert!(directory
            .by_public_key(StaticIdentity::generate().public_key())
            .is_none());
    }

    #[test]
    fn test_degenerate_key_is_fatal() {
        let local = StaticIdentity::generate();
        let entry = PeerEntry::new(PublicKey::from([0u8; 32]), vec![addr("10.0.0.1:5000")]);
        let result = Peer::new(
            &local,
            entry,
            BufferConfig::default(),
            Box::new(RawPcmCodec::new()),
        );
        assert!(matches!(
            result,
            Err(TransportError::Crypto(CryptoError::NonContributory))
        ));
    }

    #[test]
    fn test_status_times_out() {
        let local = StaticIdentity::generate();
        let peer = make_peer(&local, vec![addr("10.0.0.1:5000")]);
        assert_eq!(peer.status(), PeerStatus::Timeout);

        assert!(peer.record_receipt(0, addr("10.0.0.1:5000")));
        let received = peer.last_received().unwrap();
        assert_eq!(peer.status_at(received), PeerStatus::Connected);
        assert_eq!(
            peer.status_at(received + Duration::from_secs(4)),
            PeerStatus::Connected
        );
        assert_eq!(
            peer.status_at(received + PEER_TIMEOUT),
            PeerStatus::Timeout
        );
    }

    #[test]
    fn test_stale_ids_do_not_move_address() {
        let local = StaticIdentity::generate();
        let home = addr("10.0.0.1:5000");
        let elsewhere = addr("203.0.113.66:6666");
        let peer = make_peer(&local, vec![home]);

        let start = Instant::now();
        assert!(peer.record_receipt_at(4, home, start));
        assert!(!peer.record_receipt_at(4, elsewhere, start + Duration::from_secs(1)));
        assert!(!peer.record_receipt_at(2, elsewhere, start + Duration::from_secs(2)));
        assert_eq!(peer.confirmed_addr(), Some(home));
        assert_eq!(peer.last_received(), Some(start));

        assert!(peer.record_receipt_at(5, elsewhere, start + Duration::from_secs(3)));
        assert_eq!(peer.confirmed_addr(), Some(elsewhere));
    }

    #[test]
    fn test_restarted_sender_accepted_after_silence() {
        let local = StaticIdentity::generate();
        let home = addr("10.0.0.1:5000");
        let peer = make_peer(&local, vec![home]);

        let start = Instant::now();
        assert!(peer.record_receipt_at(900, home, start));
        assert!(!peer.record_receipt_at(0, home, start + Duration::from_secs(1)));

        let later = start + Duration::from_secs(1) + PEER_TIMEOUT;
        assert!(peer.record_receipt_at(0, home, later));
        assert_eq!(peer.last_received(), Some(later));
    }

    #[test]
    fn test_display_name_falls_back_to_key() {
        let local = StaticIdentity::generate();
        let remote = StaticIdentity::generate();

        let named = Peer::new(
            &local,
            PeerEntry::new(*remote.public_key(), vec![]).with_name("alice"),
            BufferConfig::default(),
            Box::new(RawPcmCodec::new()),
        )
        .unwrap();
        assert_eq!(named.display_name(), "alice");

        let anonymous = make_peer(&local, vec![]);
        assert_eq!(
            anonymous.display_name(),
            encode_public_key(anonymous.public_key())
        );
    }

    #[test]
    fn test_volume_is_never_negative() {
        let local = StaticIdentity::generate();
        let peer = make_peer(&local, vec![]);
        assert_eq!(peer.volume(), 1.0);
        peer.set_volume(0.5);
        assert_eq!(peer.volume(), 0.5);
        peer.set_volume(-2.0);
        assert_eq!(peer.volume(), 0.0);
    }

    #[test]
    fn test_packet_ids_unique_under_concurrency() {
        let local = StaticIdentity::generate();
        let peer = make_peer(&local, vec![]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let peer = peer.clone();
                thread::spawn(move || (0..1000).map(|_| peer.next_packet_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            // Each sender observes its own ids in increasing order.
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in ids {
                assert!(seen.insert(id), "packet id {} reused", id);
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn test_audio_frames_flow_through_buffer() {
        let local = StaticIdentity::generate();
        let peer = make_peer(&local, vec![]);
        let mut encoder = RawPcmCodec::new();

        let frame = vec![0.5f32; FRAME_SIZE];
        let compressed = Bytes::from(encoder.compress(&frame).unwrap());

        // Default minimum is three packets; id 2 is lost.
        peer.push_audio(0, compressed.clone());
        assert_eq!(peer.next_audio_frame().unwrap(), None);
        peer.push_audio(1, compressed.clone());
        peer.push_audio(3, compressed.clone());

        assert_eq!(peer.next_audio_frame().unwrap(), Some(frame.clone()));
        assert_eq!(peer.next_audio_frame().unwrap(), Some(frame.clone()));
        // The gap at id 2 is concealed with silence.
        assert_eq!(
            peer.next_audio_frame().unwrap(),
            Some(vec![0.0; FRAME_SIZE])
        );
        assert_eq!(peer.next_audio_frame().unwrap(), Some(frame));
        assert_eq!(peer.buffered(), 0);
    }
}
