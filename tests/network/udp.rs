//! Devices on real UDP sockets over the loopback interface.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::ip_constant,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;

use reflex_duel::network::messages::GameMode;
use reflex_duel::peer::PeerInputs;
use reflex_duel::{
    DeliveryConfig, DeviceId, Endpoint, Message, MessageBody, PeerConfig, PeerState,
    PeerTimingUnit, ReliableSender, UdpTransport,
};
use serial_test::serial;
use web_time::{Duration, Instant};

fn localhost() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

/// Two sockets that know each other as `a` and `b`.
fn pair(a: DeviceId, b: DeviceId) -> (UdpTransport, UdpTransport) {
    let mut first = UdpTransport::bind(localhost()).unwrap();
    let mut second = UdpTransport::bind(localhost()).unwrap();
    first.add_peer(b, second.local_addr().unwrap());
    second.add_peer(a, first.local_addr().unwrap());
    (first, second)
}

/// Polls `step` every millisecond until it returns `true` or a second passes.
fn wait_for(mut step: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if step() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
#[serial]
fn frame_crosses_a_udp_link() {
    let (host, stick) = pair(DeviceId::HOST, DeviceId::STICK1);
    let mut host = Endpoint::new(DeviceId::HOST, host);
    let mut stick = Endpoint::new(DeviceId::STICK1, stick);

    host.send(&Message::new(
        DeviceId::STICK1,
        DeviceId::HOST,
        MessageBody::CountdownTick { n: 2 },
    ));

    let mut received = Vec::new();
    assert!(wait_for(|| {
        received.extend(stick.poll_messages());
        !received.is_empty()
    }));
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].src, DeviceId::HOST);
    assert_eq!(received[0].body, MessageBody::CountdownTick { n: 2 });
    assert_eq!(stick.decoder_stats().checksum_failures, 0);
    assert_eq!(stick.decoder_stats().frames_decoded, 1);
}

#[test]
#[serial]
fn controller_acknowledges_a_round_over_udp() {
    let (host, stick) = pair(DeviceId::HOST, DeviceId::STICK2);
    let mut host = Endpoint::new(DeviceId::HOST, host);
    let mut sender = ReliableSender::new(DeviceId::HOST, DeliveryConfig::default());
    let mut controller =
        PeerTimingUnit::new(PeerConfig::new(DeviceId::STICK2), stick, Instant::now()).unwrap();

    sender.send_reliable(
        host.transport_mut(),
        DeviceId::STICK2,
        MessageBody::RoundStart {
            mode: GameMode::Shake,
            param: 12,
        },
        Instant::now(),
    );
    assert_eq!(sender.pending_count(), 1);

    assert!(wait_for(|| {
        let now = Instant::now();
        controller.poll(now, PeerInputs::default());
        for message in host.poll_messages() {
            if let MessageBody::Ack { acked } = message.body {
                sender.on_ack(message.src, acked);
            }
        }
        sender.poll(host.transport_mut(), now);
        sender.pending_count() == 0
    }));
    assert_eq!(controller.state(), PeerState::WaitingGo);
    assert_eq!(controller.mode(), Some(GameMode::Shake));
    assert_eq!(sender.stats().acks_matched, 1);
}

#[test]
#[serial]
fn unknown_destination_is_dropped() {
    let (host, _stick) = pair(DeviceId::HOST, DeviceId::STICK1);
    let mut host = Endpoint::new(DeviceId::HOST, host);
    // No address for the display: nothing is sent and nothing panics.
    host.send(&Message::new(
        DeviceId::DISPLAY,
        DeviceId::HOST,
        MessageBody::Display(reflex_duel::DisplayCommand::Go),
    ));
    assert!(host.poll_messages().is_empty());
}
