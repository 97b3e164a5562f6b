//! Per-destination ACK/retry delivery.
//!
//! The coordinator keeps at most one outstanding reliable command per
//! destination (controllers 1 to 4 and the display). A new reliable command to
//! the same destination replaces the pending one. The retry clock is driven by
//! [`ReliableSender::poll`]; a command that exhausts its budget is dropped and
//! reported, never escalated, so a lost cue degrades the game instead of
//! stalling it.
//!
//! # Timeline with the default policy (3 retries, 50 ms)
//!
//! ```text
//! t=0    send            retries_left=3
//! t=50   retransmit #1   retries_left=2
//! t=100  retransmit #2   retries_left=1
//! t=150  retransmit #3   retries_left=0
//! t=200  dropped         (no further traffic)
//! ```

use std::sync::Arc;

use tracing::{debug, trace, warn};
use web_time::Instant;

use crate::config::DeliveryConfig;
use crate::network::messages::{Message, MessageBody};
use crate::network::transport::Transport;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{report_violation_to, DeviceId};

/// Number of destinations with a pending record: four controllers and the display.
pub const PENDING_SLOTS: usize = 5;

/// An outstanding reliable command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAck {
    /// Where the command went.
    pub dest: DeviceId,
    /// The command.
    pub body: MessageBody,
    /// Retransmissions still allowed.
    pub retries_left: u8,
    /// Time of the latest transmission.
    pub last_send: Instant,
}

/// Counters kept by a [`ReliableSender`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// First transmissions of reliable commands.
    pub first_sends: u64,
    /// Retransmissions.
    pub retransmissions: u64,
    /// Best-effort sends.
    pub best_effort_sends: u64,
    /// Pending commands replaced by a newer one before being acknowledged.
    pub superseded: u64,
    /// Acks that cleared a pending record.
    pub acks_matched: u64,
    /// Acks with no matching record.
    pub acks_ignored: u64,
    /// Commands dropped after exhausting their retries.
    pub dropped: u64,
}

const fn pending_index(dest: DeviceId) -> Option<usize> {
    match dest.as_u8() {
        raw @ 0x01..=0x04 => Some(raw as usize - 1),
        0x05 => Some(4),
        _ => None,
    }
}

/// Reliable command delivery with a fixed pending table.
pub struct ReliableSender {
    local: DeviceId,
    config: DeliveryConfig,
    pending: [Option<PendingAck>; PENDING_SLOTS],
    stats: DeliveryStats,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl ReliableSender {
    /// Creates a sender for the device at `local`.
    pub fn new(local: DeviceId, config: DeliveryConfig) -> Self {
        Self {
            local,
            config,
            pending: [None; PENDING_SLOTS],
            stats: DeliveryStats::default(),
            violation_observer: None,
        }
    }

    /// Routes violations to `observer` instead of the tracing default.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Stores a pending record for `dest` and transmits immediately.
    ///
    /// Replaces any record already pending for `dest`. Returns `false` (and
    /// sends nothing) if `dest` has no pending slot.
    pub fn send_reliable<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        dest: DeviceId,
        body: MessageBody,
        now: Instant,
    ) -> bool {
        let Some(index) = pending_index(dest) else {
            report_violation_to!(
                &self.violation_observer,
                device = dest,
                ViolationSeverity::Error,
                ViolationKind::InternalError,
                "reliable send of {:?} to {} which has no pending slot",
                body,
                dest
            );
            return false;
        };
        if let Some(previous) = self.pending[index] {
            if previous.body != body {
                trace!(%dest, old = ?previous.body, new = ?body, "pending command superseded");
                self.stats.superseded += 1;
            }
        }
        self.pending[index] = Some(PendingAck {
            dest,
            body,
            retries_left: self.config.max_retries,
            last_send: now,
        });
        self.stats.first_sends += 1;
        self.transmit(transport, dest, body);
        true
    }

    /// Sends once without tracking.
    pub fn send_best_effort<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        dest: DeviceId,
        body: MessageBody,
    ) {
        self.stats.best_effort_sends += 1;
        self.transmit(transport, dest, body);
    }

    /// Clears the record pending for `src` if it carries `acked`.
    ///
    /// Returns whether a record was cleared. Stale or unknown acks are normal on
    /// a lossy link and only counted.
    pub fn on_ack(&mut self, src: DeviceId, acked: u8) -> bool {
        let matched = match pending_index(src) {
            Some(index) => {
                let hit = self.pending[index].is_some_and(|pending| pending.body.code() == acked);
                if hit {
                    self.pending[index] = None;
                }
                hit
            },
            None => false,
        };
        if matched {
            trace!(%src, acked, "ack matched");
            self.stats.acks_matched += 1;
        } else {
            trace!(%src, acked, "ack ignored");
            self.stats.acks_ignored += 1;
        }
        matched
    }

    /// Retry clock: retransmits every record at least one interval old and drops
    /// records whose budget is spent.
    pub fn poll<T: Transport + ?Sized>(&mut self, transport: &mut T, now: Instant) {
        for index in 0..PENDING_SLOTS {
            let Some(mut pending) = self.pending[index] else {
                continue;
            };
            if now.saturating_duration_since(pending.last_send) < self.config.retry_interval {
                continue;
            }
            if pending.retries_left == 0 {
                self.pending[index] = None;
                self.stats.dropped += 1;
                warn!(dest = %pending.dest, body = ?pending.body, "reliable command dropped");
                report_violation_to!(
                    &self.violation_observer,
                    device = pending.dest,
                    ViolationSeverity::Error,
                    ViolationKind::Delivery,
                    "command 0x{:02X} to {} dropped after {} retries",
                    pending.body.code(),
                    pending.dest,
                    self.config.max_retries
                );
                continue;
            }
            pending.retries_left -= 1;
            pending.last_send = now;
            self.pending[index] = Some(pending);
            self.stats.retransmissions += 1;
            debug!(dest = %pending.dest, body = ?pending.body, left = pending.retries_left, "retransmit");
            self.transmit(transport, pending.dest, pending.body);
        }
    }

    /// Forgets every pending record.
    pub fn clear(&mut self) {
        self.pending = [None; PENDING_SLOTS];
    }

    /// The record pending for `dest`, if any.
    #[must_use]
    pub fn pending(&self, dest: DeviceId) -> Option<&PendingAck> {
        pending_index(dest).and_then(|index| self.pending[index].as_ref())
    }

    /// Number of records awaiting acknowledgment.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.iter().flatten().count()
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> DeliveryStats {
        self.stats
    }

    /// The retry policy in force.
    #[must_use]
    pub fn config(&self) -> DeliveryConfig {
        self.config
    }

    fn transmit<T: Transport + ?Sized>(&self, transport: &mut T, dest: DeviceId, body: MessageBody) {
        let message = Message::new(dest, self.local, body);
        transport.send_to(&message.to_bytes(), dest);
    }
}

impl std::fmt::Debug for ReliableSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableSender")
            .field("local", &self.local)
            .field("config", &self.config)
            .field("pending", &self.pending_count())
            .field("stats", &self.stats)
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
    use crate::network::codec::decode_stream;
    use crate::network::loopback::{LoopbackBus, LoopbackPort};
    use crate::network::messages::{codes, DisplayCommand, GameMode};
    use crate::telemetry::CollectingObserver;
    use web_time::Duration;

    fn setup() -> (LoopbackPort, LoopbackPort, ReliableSender) {
        let bus = LoopbackBus::new();
        let host = bus.port(DeviceId::HOST);
        let stick = bus.port(DeviceId::STICK1);
        (
            host,
            stick,
            ReliableSender::new(DeviceId::HOST, DeliveryConfig::default()),
        )
    }

    fn frames_at(port: &mut LoopbackPort) -> usize {
        decode_stream(&port.receive_all_bytes()).len()
    }

    #[test]
    fn send_reliable_transmits_immediately() {
        let (mut host, mut stick, mut sender) = setup();
        let now = Instant::now();
        assert!(sender.send_reliable(&mut host, DeviceId::STICK1, MessageBody::Go, now));
        assert_eq!(frames_at(&mut stick), 1);
        assert_eq!(sender.pending_count(), 1);
        assert_eq!(sender.pending(DeviceId::STICK1).unwrap().retries_left, 3);
    }

    #[test]
    fn ack_clears_record_and_stops_retries() {
        let (mut host, mut stick, mut sender) = setup();
        let t0 = Instant::now();
        sender.send_reliable(&mut host, DeviceId::STICK1, MessageBody::Go, t0);
        frames_at(&mut stick);

        assert!(sender.on_ack(DeviceId::STICK1, codes::GO));
        sender.poll(&mut host, t0 + Duration::from_millis(500));
        assert_eq!(frames_at(&mut stick), 0);
        assert_eq!(sender.stats().acks_matched, 1);
    }

    #[test]
    fn mismatched_ack_is_ignored() {
        let (mut host, _stick, mut sender) = setup();
        let t0 = Instant::now();
        sender.send_reliable(&mut host, DeviceId::STICK1, MessageBody::Go, t0);

        assert!(!sender.on_ack(DeviceId::STICK1, codes::ROUND_START));
        assert!(!sender.on_ack(DeviceId::STICK2, codes::GO));
        assert!(!sender.on_ack(DeviceId::new(0x42), codes::GO));
        assert_eq!(sender.pending_count(), 1);
        assert_eq!(sender.stats().acks_ignored, 3);
    }

    #[test]
    fn retry_exhaustion_sends_exactly_budget_then_clears() {
        let (mut host, mut stick, mut sender) = setup();
        let observer = Arc::new(CollectingObserver::new());
        sender = sender.with_violation_observer(observer.clone());
        let t0 = Instant::now();
        sender.send_reliable(&mut host, DeviceId::STICK1, MessageBody::ReturnToIdle, t0);
        assert_eq!(frames_at(&mut stick), 1);

        // Just before the interval nothing goes out
        sender.poll(&mut host, t0 + Duration::from_millis(49));
        assert_eq!(frames_at(&mut stick), 0);

        for retry in 1..=3u64 {
            sender.poll(&mut host, t0 + Duration::from_millis(50 * retry));
            assert_eq!(frames_at(&mut stick), 1, "retry {retry}");
        }
        sender.poll(&mut host, t0 + Duration::from_millis(200));
        assert_eq!(frames_at(&mut stick), 0);
        assert_eq!(sender.pending_count(), 0);

        // Nothing more, ever
        sender.poll(&mut host, t0 + Duration::from_secs(10));
        assert_eq!(frames_at(&mut stick), 0);

        let stats = sender.stats();
        assert_eq!(stats.first_sends, 1);
        assert_eq!(stats.retransmissions, 3);
        assert_eq!(stats.dropped, 1);
        crate::assert_violation!(observer, ViolationKind::Delivery);
    }

    #[test]
    fn new_send_replaces_pending_record() {
        let (mut host, _stick, mut sender) = setup();
        let t0 = Instant::now();
        sender.send_reliable(
            &mut host,
            DeviceId::STICK1,
            MessageBody::RoundStart {
                mode: GameMode::Shake,
                param: 10,
            },
            t0,
        );
        sender.send_reliable(&mut host, DeviceId::STICK1, MessageBody::Go, t0);

        assert_eq!(sender.pending_count(), 1);
        assert_eq!(sender.pending(DeviceId::STICK1).unwrap().body, MessageBody::Go);
        assert_eq!(sender.stats().superseded, 1);
        // The old command's ack no longer matches
        assert!(!sender.on_ack(DeviceId::STICK1, codes::ROUND_START));
    }

    #[test]
    fn destinations_are_independent() {
        let bus = LoopbackBus::new();
        let mut host = bus.port(DeviceId::HOST);
        let _display = bus.port(DeviceId::DISPLAY);
        let mut sender = ReliableSender::new(DeviceId::HOST, DeliveryConfig::default());
        let t0 = Instant::now();
        sender.send_reliable(&mut host, DeviceId::STICK1, MessageBody::Go, t0);
        sender.send_reliable(
            &mut host,
            DeviceId::DISPLAY,
            MessageBody::Display(DisplayCommand::Go),
            t0,
        );
        assert_eq!(sender.pending_count(), 2);
        assert!(sender.on_ack(DeviceId::DISPLAY, codes::DISP_GO));
        assert!(sender.pending(DeviceId::STICK1).is_some());
    }

    #[test]
    fn broadcast_and_host_have_no_pending_slot() {
        let (mut host, mut stick, mut sender) = setup();
        let observer = Arc::new(CollectingObserver::new());
        sender = sender.with_violation_observer(observer.clone());
        let now = Instant::now();
        assert!(!sender.send_reliable(&mut host, DeviceId::BROADCAST, MessageBody::Go, now));
        assert!(!sender.send_reliable(&mut host, DeviceId::HOST, MessageBody::Go, now));
        assert_eq!(frames_at(&mut stick), 0);
        assert_eq!(observer.len(), 2);
    }

    #[test]
    fn best_effort_is_not_tracked() {
        let (mut host, mut stick, mut sender) = setup();
        sender.send_best_effort(
            &mut host,
            DeviceId::STICK1,
            MessageBody::ShakeProgress {
                count: 3,
                target: 10,
            },
        );
        assert_eq!(frames_at(&mut stick), 1);
        assert_eq!(sender.pending_count(), 0);
        assert_eq!(sender.stats().best_effort_sends, 1);
    }

    #[test]
    fn clear_forgets_everything() {
        let (mut host, mut stick, mut sender) = setup();
        let t0 = Instant::now();
        sender.send_reliable(&mut host, DeviceId::STICK1, MessageBody::Go, t0);
        frames_at(&mut stick);
        sender.clear();
        sender.poll(&mut host, t0 + Duration::from_secs(1));
        assert_eq!(frames_at(&mut stick), 0);
    }
}
