use std::sync::Arc;

use tracing::trace;

use crate::network::codec::{DecoderStats, FrameDecoder};
use crate::network::messages::Message;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{report_violation_to, DeviceId};

/// This [`Transport`] trait is the seam between the game and the radio.
///
/// Bytes are sent in a radio-like fashion: unordered, unreliable, possibly
/// duplicated or corrupted. Inbound bytes need not arrive on frame boundaries;
/// the [`Endpoint`] above a transport reassembles and validates frames.
///
/// Implementations must not block: `send_to` queues or drops, `receive_all_bytes`
/// returns whatever arrived since the previous call (possibly nothing).
pub trait Transport: Send {
    /// Sends raw bytes to `to`. [`DeviceId::BROADCAST`] reaches every other device.
    ///
    /// Failures are the transport's to log; the caller never retries here.
    fn send_to(&mut self, bytes: &[u8], to: DeviceId);

    /// Returns every byte received since the last call.
    fn receive_all_bytes(&mut self) -> Vec<u8>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_to(&mut self, bytes: &[u8], to: DeviceId) {
        (**self).send_to(bytes, to);
    }

    fn receive_all_bytes(&mut self) -> Vec<u8> {
        (**self).receive_all_bytes()
    }
}

/// A device's view of the link: a transport plus the streaming decoder.
///
/// `poll_messages` returns typed messages addressed to this device or to
/// broadcast. Frames addressed elsewhere (overheard on a shared medium) are
/// skipped silently; checksum-valid frames with unknown commands are reported as
/// transport violations and dropped.
pub struct Endpoint<T: Transport> {
    local: DeviceId,
    transport: T,
    decoder: FrameDecoder,
    unknown_frames: u64,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl<T: Transport> Endpoint<T> {
    /// Creates an endpoint for the device at `local`.
    pub fn new(local: DeviceId, transport: T) -> Self {
        Self {
            local,
            transport,
            decoder: FrameDecoder::new(),
            unknown_frames: 0,
            violation_observer: None,
        }
    }

    /// Routes violations to `observer` instead of the tracing default.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// This device's address.
    #[must_use]
    pub fn local(&self) -> DeviceId {
        self.local
    }

    /// Encodes and sends a message to its destination.
    pub fn send(&mut self, message: &Message) {
        trace!(dest = %message.dest, body = ?message.body, "send");
        self.transport.send_to(&message.to_bytes(), message.dest);
    }

    /// Drains the transport and returns every message for this device, in
    /// arrival order.
    pub fn poll_messages(&mut self) -> Vec<Message> {
        let bytes = self.transport.receive_all_bytes();
        if !bytes.is_empty() {
            self.decoder.push(&bytes);
        }
        let mut messages = Vec::new();
        while let Some(frame) = self.decoder.next_frame() {
            let dest = DeviceId::new(frame.dest);
            if dest != self.local && dest != DeviceId::BROADCAST {
                continue;
            }
            match Message::try_from(frame) {
                Ok(message) => {
                    trace!(src = %message.src, body = ?message.body, "recv");
                    messages.push(message);
                },
                Err(err) => {
                    self.unknown_frames += 1;
                    report_violation_to!(
                        &self.violation_observer,
                        device = DeviceId::new(frame.src),
                        ViolationSeverity::Warning,
                        ViolationKind::Transport,
                        "dropped frame: {}",
                        err
                    );
                },
            }
        }
        messages
    }

    /// Decoder counters.
    #[must_use]
    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Checksum-valid frames that did not parse as a known message.
    #[must_use]
    pub fn unknown_frames(&self) -> u64 {
        self.unknown_frames
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for Endpoint<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("local", &self.local)
            .field("transport", &self.transport)
            .field("buffered", &self.decoder.buffered())
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::network::codec::{encode, Frame};
    use crate::network::loopback::LoopbackBus;
    use crate::network::messages::{codes, MessageBody};
    use crate::telemetry::CollectingObserver;
    use crate::ResultTime;

    #[test]
    fn messages_cross_the_bus() {
        let bus = LoopbackBus::new();
        let mut host = Endpoint::new(DeviceId::HOST, bus.port(DeviceId::HOST));
        let mut stick = Endpoint::new(DeviceId::STICK2, bus.port(DeviceId::STICK2));

        stick.send(&Message::new(
            DeviceId::HOST,
            DeviceId::STICK2,
            MessageBody::ReactionResult(ResultTime::Millis(180)),
        ));

        let received = host.poll_messages();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].src, DeviceId::STICK2);
        assert_eq!(
            received[0].body,
            MessageBody::ReactionResult(ResultTime::Millis(180))
        );
        assert!(host.poll_messages().is_empty());
    }

    #[test]
    fn frames_for_other_devices_are_skipped() {
        let bus = LoopbackBus::new();
        let mut stick1 = Endpoint::new(DeviceId::STICK1, bus.port(DeviceId::STICK1));
        let mut raw = bus.port(DeviceId::HOST);
        // Overheard unicast to stick 2, then a broadcast go
        let mut bytes = encode(0x02, 0x00, codes::GO, 0).to_vec();
        bytes.extend_from_slice(&encode(0xFF, 0x00, codes::GO, 0));
        raw.send_to(&bytes, DeviceId::STICK1);

        let received = stick1.poll_messages();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].dest, DeviceId::BROADCAST);
    }

    #[test]
    fn unknown_commands_are_reported_and_dropped() {
        let bus = LoopbackBus::new();
        let observer = Arc::new(CollectingObserver::new());
        let mut host = Endpoint::new(DeviceId::HOST, bus.port(DeviceId::HOST))
            .with_violation_observer(observer.clone());
        let mut raw = bus.port(DeviceId::STICK1);
        raw.send_to(&Frame::new(0x00, 0x01, 0x7E, 0).to_bytes(), DeviceId::HOST);

        assert!(host.poll_messages().is_empty());
        assert_eq!(host.unknown_frames(), 1);
        crate::assert_violation!(observer, ViolationKind::Transport);
        assert_eq!(observer.violations()[0].device, Some(DeviceId::STICK1));
    }

    #[test]
    fn split_frames_are_reassembled_across_polls() {
        let bus = LoopbackBus::new();
        let mut host = Endpoint::new(DeviceId::HOST, bus.port(DeviceId::HOST));
        let mut raw = bus.port(DeviceId::STICK3);
        let bytes = encode(0x00, 0x03, codes::ACK, u16::from(codes::GO));

        raw.send_to(&bytes[..3], DeviceId::HOST);
        assert!(host.poll_messages().is_empty());
        raw.send_to(&bytes[3..], DeviceId::HOST);
        let received = host.poll_messages();
        assert_eq!(
            received[0].body,
            MessageBody::Ack { acked: codes::GO }
        );
    }
}
