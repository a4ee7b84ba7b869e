//! The encrypted UDP transport.
//!
//! One socket is shared by every peer. A background task reads datagrams,
//! matches them to peers by source address, decrypts, and routes audio into
//! the sending peer's reception buffer. Sends run on the caller.
//!
//! ```text
//! recv_from -> PeerDirectory::lookup -> Peer::open -> Payload::parse
//!                                                        |-- Audio -> ReceptionBuffer
//!                                                        `-- Video -> dropped
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use socket2::SockRef;
use spear_common::SpearConfig;
use spear_core::{BufferConfig, Payload, MAX_DATAGRAM_SIZE};
use spear_crypto::{encode_public_key, PublicKey, StaticIdentity};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::address::AddressSet;
use crate::audio::{AudioCodec, RawPcmCodec};
use crate::error::TransportError;
use crate::peer::{Lookup, Peer, PeerDirectory, PeerEntry, UnknownPeerPolicy};

/// Socket receive buffer requested at startup.
pub const RECV_BUFFER_SIZE: usize = 0x100000;

/// Builds one audio decoder per peer.
pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn AudioCodec> + Send + Sync>;

/// Everything needed to bring up a [`Transport`].
pub struct TransportConfig {
    pub identity: StaticIdentity,
    pub candidates: Vec<SocketAddr>,
    pub peers: Vec<PeerEntry>,
    pub buffer: BufferConfig,
    pub unknown_peers: UnknownPeerPolicy,
    pub decoder: DecoderFactory,
}

impl TransportConfig {
    pub fn new(identity: StaticIdentity, candidates: Vec<SocketAddr>) -> Self {
        Self {
            identity,
            candidates,
            peers: Vec::new(),
            buffer: BufferConfig::default(),
            unknown_peers: UnknownPeerPolicy::default(),
            decoder: Arc::new(|| Box::new(RawPcmCodec::new())),
        }
    }

    pub fn with_peer(mut self, peer: PeerEntry) -> Self {
        self.peers.push(peer);
        self
    }

    /// Translate a loaded configuration file.
    pub fn from_config(config: &SpearConfig) -> Result<Self, TransportError> {
        config
            .validate()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        let identity = StaticIdentity::from_bytes(*config.sk.as_bytes());
        let mut transport = Self::new(identity, config.candidates.clone());

        for peer in &config.peers {
            transport.peers.push(PeerEntry {
                public_key: PublicKey::from(*peer.pk.as_bytes()),
                name: peer.name.clone(),
                candidates: peer.candidates.clone(),
                volume: peer.volume,
            });
        }

        transport.buffer = config.buffer;
        transport.unknown_peers = if config.admit_unknown_addresses {
            UnknownPeerPolicy::TryKnownKeys
        } else {
            UnknownPeerPolicy::Drop
        };
        Ok(transport)
    }
}

/// A bound, running endpoint.
///
/// Dropping the transport stops the receive loop; [`shutdown`](Self::shutdown)
/// also waits for it to finish.
pub struct Transport {
    public_key: PublicKey,
    local: AddressSet,
    socket: Arc<UdpSocket>,
    peers: Arc<PeerDirectory>,
    shutdown_tx: watch::Sender<bool>,
    receiver: Option<JoinHandle<()>>,
}

impl Transport {
    /// Bind the socket, derive every peer's keys, and start receiving.
    pub async fn initialize(config: TransportConfig) -> Result<Self, TransportError> {
        if config.candidates.is_empty() {
            return Err(TransportError::NoCandidates);
        }

        let mut peers = Vec::with_capacity(config.peers.len());
        for entry in config.peers {
            let decoder = (config.decoder)();
            peers.push(Arc::new(Peer::new(
                &config.identity,
                entry,
                config.buffer,
                decoder,
            )?));
        }
        let peers = Arc::new(PeerDirectory::new(peers));

        let mut local = AddressSet::new(config.candidates);
        let socket = local.bind().await?;
        if let Err(e) = SockRef::from(&socket).set_recv_buffer_size(RECV_BUFFER_SIZE) {
            warn!("failed to set receive buffer size: {}", e);
        }
        let socket = Arc::new(socket);

        info!(
            "listening on {} as {} with {} peers",
            socket.local_addr()?,
            encode_public_key(config.identity.public_key()),
            peers.len()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let receiver = tokio::spawn(receive_loop(
            socket.clone(),
            peers.clone(),
            config.unknown_peers,
            shutdown_rx,
        ));

        Ok(Self {
            public_key: *config.identity.public_key(),
            local,
            socket,
            peers,
            shutdown_tx,
            receiver: Some(receiver),
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// The candidate the socket was bound to.
    pub fn bound_candidate(&self) -> Option<SocketAddr> {
        self.local.confirmed()
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    /// Encrypt and send `plaintext` to every target of `peer`.
    ///
    /// Returns the packet id used. Delivery is not confirmed.
    pub async fn send(&self, peer: &Peer, plaintext: &[u8]) -> Result<u32, TransportError> {
        let packet_id = peer.next_packet_id();
        let frame = peer.seal(packet_id, plaintext)?;

        let targets = peer.address_set();
        let sent = targets.write(&self.socket, &frame).await;
        trace!(packet_id, sent, "sent to {}", peer.display_name());
        Ok(packet_id)
    }

    /// Non-blocking [`send`](Self::send) for real-time threads.
    pub fn try_send(&self, peer: &Peer, plaintext: &[u8]) -> Result<u32, TransportError> {
        let packet_id = peer.next_packet_id();
        let frame = peer.seal(packet_id, plaintext)?;

        let sent = peer.try_write(&self.socket, &frame);
        trace!(packet_id, sent, "sent to {}", peer.display_name());
        Ok(packet_id)
    }

    /// Send one compressed audio frame.
    pub async fn send_audio(&self, peer: &Peer, frame: &[u8]) -> Result<u32, TransportError> {
        let payload = Payload::Audio(Bytes::copy_from_slice(frame)).encode();
        self.send(peer, &payload).await
    }

    pub fn try_send_audio(&self, peer: &Peer, frame: &[u8]) -> Result<u32, TransportError> {
        let payload = Payload::Audio(Bytes::copy_from_slice(frame)).encode();
        self.try_send(peer, &payload)
    }

    /// Stop the receive loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(receiver) = self.receiver.take() {
            if let Err(e) = receiver.await {
                warn!("receive loop ended abnormally: {}", e);
            }
        }
        info!("transport shut down");
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    peers: Arc<PeerDirectory>,
    policy: UnknownPeerPolicy,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("receive loop shutdown requested");
                break;
            }
            recv = socket.recv_from(&mut buf) => {
                let (len, from) = match recv {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("recv error: {}", e);
                        continue;
                    }
                };
                dispatch(&peers, policy, &buf[..len], from);
            }
        }
    }
}

/// Route one datagram. Returns the peer that authenticated it, if any.
pub(crate) fn dispatch(
    peers: &PeerDirectory,
    policy: UnknownPeerPolicy,
    datagram: &[u8],
    from: SocketAddr,
) -> Option<Arc<Peer>> {
    let candidates = match peers.lookup(from) {
        Lookup::Known(candidates) => candidates,
        Lookup::Unknown(addr) => match policy {
            UnknownPeerPolicy::Drop => {
                trace!("dropping datagram from unlisted address {}", addr);
                return None;
            }
            UnknownPeerPolicy::TryKnownKeys => peers.all(),
        },
    };

    for peer in candidates {
        let Ok((packet_id, plaintext)) = peer.open(datagram) else {
            continue;
        };
        if !peer.record_receipt(packet_id, from) {
            trace!(packet_id, "stale id from {}, address unchanged", from);
        }

        match Payload::parse(Bytes::from(plaintext)) {
            Ok(Payload::Audio(frame)) => peer.push_audio(packet_id, frame),
            Ok(Payload::Video(frame)) => {
                debug!(
                    packet_id,
                    len = frame.len(),
                    "dropping video payload from {}",
                    peer.display_name()
                );
            }
            Err(e) => warn!("bad payload from {}: {}", peer.display_name(), e),
        }
        return Some(peer);
    }

    trace!("no key decrypted datagram from {}", from);
    None
}
