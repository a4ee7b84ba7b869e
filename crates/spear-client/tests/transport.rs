//! End-to-end tests over loopback UDP.

use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::time::Duration;

use spear_client::{
    AudioCodec, PeerEntry, PeerStatus, RawPcmCodec, ToneGenerator, Transport, TransportConfig,
    UnknownPeerPolicy,
};
use spear_crypto::StaticIdentity;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Instant};

/// Pick a free loopback port. The socket is dropped before the transport
/// binds it, so another process could race us; acceptable for tests.
fn free_loopback_addr() -> SocketAddr {
    let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_two_transports_exchange_audio() {
    let alice = StaticIdentity::generate();
    let bob = StaticIdentity::generate();
    let alice_addr = free_loopback_addr();
    let bob_addr = free_loopback_addr();

    let alice_public = *alice.public_key();
    let bob_public = *bob.public_key();

    let alice_transport = Transport::initialize(
        TransportConfig::new(alice, vec![alice_addr])
            .with_peer(PeerEntry::new(bob_public, vec![bob_addr]).with_name("bob")),
    )
    .await
    .unwrap();
    let bob_transport = Transport::initialize(
        TransportConfig::new(bob, vec![bob_addr])
            .with_peer(PeerEntry::new(alice_public, vec![alice_addr]).with_name("alice")),
    )
    .await
    .unwrap();

    let bob_at_alice = alice_transport.peers().by_public_key(&bob_public).unwrap();
    let alice_at_bob = bob_transport.peers().by_public_key(&alice_public).unwrap();

    let mut encoder = RawPcmCodec::new();
    let mut tone = ToneGenerator::new(440.0);
    let frames: Vec<Vec<f32>> = (0..4).map(|_| tone.next_frame()).collect();

    for (expected_id, frame) in frames.iter().enumerate() {
        let compressed = encoder.compress(frame).unwrap();
        let id = alice_transport
            .send_audio(&bob_at_alice, &compressed)
            .await
            .unwrap();
        assert_eq!(id, expected_id as u32);
    }

    wait_for(|| alice_at_bob.buffered() >= 3).await;
    assert_eq!(alice_at_bob.status(), PeerStatus::Connected);
    assert_eq!(alice_at_bob.confirmed_addr(), Some(alice_addr));

    // Frames come out in order once the buffer has filled.
    let first = alice_at_bob.next_audio_frame().unwrap().unwrap();
    assert_eq!(first, frames[0]);
    let second = alice_at_bob.next_audio_frame().unwrap().unwrap();
    assert_eq!(second, frames[1]);

    // And the reverse direction works over the same sockets.
    let silence = encoder.compress(&vec![0.0; spear_client::FRAME_SIZE]).unwrap();
    bob_transport.try_send_audio(&alice_at_bob, &silence).unwrap();
    wait_for(|| bob_at_alice.status() == PeerStatus::Connected).await;

    alice_transport.shutdown().await;
    bob_transport.shutdown().await;
}

#[tokio::test]
async fn test_unlisted_address_is_ignored() {
    let alice = StaticIdentity::generate();
    let bob = StaticIdentity::generate();
    let bob_addr = free_loopback_addr();
    let alice_public = *alice.public_key();

    // Bob expects Alice somewhere she is not.
    let bob_transport = Transport::initialize(
        TransportConfig::new(bob, vec![bob_addr]).with_peer(PeerEntry::new(
            alice_public,
            vec!["127.0.0.1:9".parse().unwrap()],
        )),
    )
    .await
    .unwrap();
    let alice_at_bob = bob_transport.peers().by_public_key(&alice_public).unwrap();

    let alice_transport = Transport::initialize(
        TransportConfig::new(alice, vec!["127.0.0.1:0".parse().unwrap()])
            .with_peer(PeerEntry::new(*bob_transport.public_key(), vec![bob_addr])),
    )
    .await
    .unwrap();
    let bob_at_alice = alice_transport
        .peers()
        .by_public_key(bob_transport.public_key())
        .unwrap();

    for _ in 0..5 {
        alice_transport
            .send_audio(&bob_at_alice, &[1, 2, 3])
            .await
            .unwrap();
    }
    sleep(Duration::from_millis(200)).await;

    assert_eq!(alice_at_bob.buffered(), 0);
    assert_eq!(alice_at_bob.status(), PeerStatus::Timeout);

    alice_transport.shutdown().await;
    bob_transport.shutdown().await;
}

#[tokio::test]
async fn test_known_key_from_new_address_is_admitted() {
    let alice = StaticIdentity::generate();
    let bob = StaticIdentity::generate();
    let bob_addr = free_loopback_addr();
    let alice_public = *alice.public_key();

    let mut config = TransportConfig::new(bob, vec![bob_addr]).with_peer(PeerEntry::new(
        alice_public,
        vec!["127.0.0.1:9".parse().unwrap()],
    ));
    config.unknown_peers = UnknownPeerPolicy::TryKnownKeys;
    let bob_transport = Transport::initialize(config).await.unwrap();
    let alice_at_bob = bob_transport.peers().by_public_key(&alice_public).unwrap();

    let alice_transport = Transport::initialize(
        TransportConfig::new(alice, vec!["127.0.0.1:0".parse().unwrap()])
            .with_peer(PeerEntry::new(*bob_transport.public_key(), vec![bob_addr])),
    )
    .await
    .unwrap();
    let alice_addr = alice_transport.local_addr().unwrap();
    let bob_at_alice = alice_transport
        .peers()
        .by_public_key(bob_transport.public_key())
        .unwrap();

    alice_transport
        .send_audio(&bob_at_alice, &[1, 2, 3])
        .await
        .unwrap();

    wait_for(|| alice_at_bob.confirmed_addr() == Some(alice_addr)).await;
    assert_eq!(alice_at_bob.status(), PeerStatus::Connected);

    alice_transport.shutdown().await;
    bob_transport.shutdown().await;
}

#[tokio::test]
async fn test_garbage_datagrams_do_not_stop_the_loop() {
    let alice = StaticIdentity::generate();
    let bob = StaticIdentity::generate();
    let alice_addr = free_loopback_addr();
    let alice_public = *alice.public_key();

    let bob_transport = Transport::initialize(
        TransportConfig::new(bob, vec!["127.0.0.1:0".parse().unwrap()])
            .with_peer(PeerEntry::new(alice_public, vec![alice_addr])),
    )
    .await
    .unwrap();
    let bob_addr = bob_transport.local_addr().unwrap();
    let alice_at_bob = bob_transport.peers().by_public_key(&alice_public).unwrap();

    // Garbage from Alice's own address first, then a real packet.
    {
        let impostor = UdpSocket::bind(alice_addr).await.unwrap();
        for len in [0usize, 3, 20, 100] {
            impostor.send_to(&vec![0xAB; len], bob_addr).await.unwrap();
        }
    }

    let alice_transport = Transport::initialize(
        TransportConfig::new(alice, vec![alice_addr])
            .with_peer(PeerEntry::new(*bob_transport.public_key(), vec![bob_addr])),
    )
    .await
    .unwrap();
    let bob_at_alice = alice_transport
        .peers()
        .by_public_key(bob_transport.public_key())
        .unwrap();
    alice_transport
        .send_audio(&bob_at_alice, &[9, 9, 9])
        .await
        .unwrap();

    wait_for(|| alice_at_bob.status() == PeerStatus::Connected).await;
    assert_eq!(alice_at_bob.buffered(), 1);

    alice_transport.shutdown().await;
    bob_transport.shutdown().await;
}

#[tokio::test]
async fn test_packet_ids_count_per_peer() {
    let alice = StaticIdentity::generate();
    let bob = StaticIdentity::generate();
    let carol = StaticIdentity::generate();

    let (bob_sink, carol_sink) = (free_loopback_addr(), free_loopback_addr());
    let transport = Transport::initialize(
        TransportConfig::new(alice, vec!["127.0.0.1:0".parse().unwrap()])
            .with_peer(PeerEntry::new(*bob.public_key(), vec![bob_sink]))
            .with_peer(PeerEntry::new(*carol.public_key(), vec![carol_sink])),
    )
    .await
    .unwrap();
    let to_bob = transport.peers().by_public_key(bob.public_key()).unwrap();
    let to_carol = transport.peers().by_public_key(carol.public_key()).unwrap();

    for expected in 0..3u32 {
        assert_eq!(transport.send(&to_bob, &[0x00, 1]).await.unwrap(), expected);
    }
    assert_eq!(transport.send(&to_carol, &[0x00, 1]).await.unwrap(), 0);
    assert_eq!(transport.try_send(&to_carol, &[0x00, 2]).unwrap(), 1);
    assert_eq!(transport.send(&to_bob, &[0x00, 3]).await.unwrap(), 3);

    transport.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_prompt_without_traffic() {
    let transport = Transport::initialize(TransportConfig::new(
        StaticIdentity::generate(),
        vec!["127.0.0.1:0".parse().unwrap()],
    ))
    .await
    .unwrap();

    timeout(Duration::from_secs(1), transport.shutdown())
        .await
        .expect("shutdown blocked on an idle socket");
}
