//! A configurable transport wrapper for radio fault injection.
//!
//! [`ChaosTransport`] wraps any [`Transport`] to simulate a hostile 2.4 GHz
//! link: lost frames, loss bursts, duplicates, flipped bits, stray bytes ahead
//! of a frame, swapped frame order and bytes lost on the serial line. The
//! protocol above must ride through all of it.
//!
//! # Example
//!
//! ```rust
//! use reflex_duel::network::loopback::LoopbackBus;
//! use reflex_duel::{ChaosConfig, ChaosTransport, DeviceId, Transport};
//!
//! let config = ChaosConfig::builder()
//!     .packet_loss_rate(0.2)
//!     .corruption_rate(0.05)
//!     .seed(42)
//!     .build();
//!
//! let bus = LoopbackBus::new();
//! let mut host = ChaosTransport::new(bus.port(DeviceId::HOST), config);
//! let _stick = bus.port(DeviceId::STICK1);
//! host.send_to(&[0xAA, 0x01], DeviceId::STICK1);
//! assert_eq!(host.stats().frames_sent, 1);
//! ```
//!
//! All randomness comes from one seeded [`Pcg32`], so a failing run replays
//! exactly from its seed.

use crate::network::transport::Transport;
use crate::rng::{Pcg32, Rng, SeedableRng};
use crate::DeviceId;

/// Configuration for link fault simulation.
///
/// Use [`ChaosConfig::builder()`] for a fluent configuration API.
/// All rates default to 0.0 (no effect).
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    /// Probability of dropping a frame on send (0.0 - 1.0, default: 0.0)
    pub send_loss_rate: f64,

    /// Probability of dropping each received byte (0.0 - 1.0, default: 0.0)
    pub receive_byte_loss_rate: f64,

    /// Probability of sending a frame twice (0.0 - 1.0, default: 0.0)
    pub duplication_rate: f64,

    /// Probability of flipping one random bit of a frame (0.0 - 1.0, default: 0.0)
    pub corruption_rate: f64,

    /// Probability of prefixing a frame with stray bytes (0.0 - 1.0, default: 0.0)
    pub garbage_rate: f64,

    /// Most stray bytes injected at once (default: 4)
    pub max_garbage_bytes: usize,

    /// Probability of holding a frame back until after the next one (0.0 - 1.0, default: 0.0)
    pub reorder_rate: f64,

    /// Probability of starting a burst loss event (0.0 - 1.0, default: 0.0)
    /// When triggered, drops `burst_loss_length` consecutive frames
    pub burst_loss_probability: f64,

    /// Number of consecutive frames to drop during a burst loss event (default: 0)
    pub burst_loss_length: usize,

    /// Random seed for deterministic behavior (default: clock-derived)
    pub seed: Option<u64>,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            send_loss_rate: 0.0,
            receive_byte_loss_rate: 0.0,
            duplication_rate: 0.0,
            corruption_rate: 0.0,
            garbage_rate: 0.0,
            max_garbage_bytes: 4,
            reorder_rate: 0.0,
            burst_loss_probability: 0.0,
            burst_loss_length: 0,
            seed: None,
        }
    }
}

impl ChaosConfig {
    /// Creates a new builder for fluent configuration.
    pub fn builder() -> ChaosConfigBuilder {
        ChaosConfigBuilder::new()
    }

    /// Creates a config with no faults (passthrough mode).
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Creates a config that only drops frames.
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            send_loss_rate: loss_rate.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    /// A crowded room: some loss, the odd duplicate and damaged frame.
    pub fn noisy_radio() -> Self {
        Self {
            send_loss_rate: 0.1,
            duplication_rate: 0.02,
            corruption_rate: 0.02,
            garbage_rate: 0.02,
            reorder_rate: 0.02,
            ..Default::default()
        }
    }

    /// Everything at once, hard.
    pub fn hostile_radio() -> Self {
        Self {
            send_loss_rate: 0.25,
            receive_byte_loss_rate: 0.005,
            duplication_rate: 0.05,
            corruption_rate: 0.05,
            garbage_rate: 0.05,
            reorder_rate: 0.05,
            burst_loss_probability: 0.02,
            burst_loss_length: 4,
            ..Default::default()
        }
    }
}

/// Builder for [`ChaosConfig`]. Rates are clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
#[must_use = "ChaosConfigBuilder does nothing until .build() is called"]
pub struct ChaosConfigBuilder {
    config: ChaosConfig,
}

impl ChaosConfigBuilder {
    /// Creates a new builder with default (passthrough) settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets send-side frame loss.
    pub fn packet_loss_rate(mut self, rate: f64) -> Self {
        self.config.send_loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets receive-side per-byte loss.
    pub fn receive_byte_loss_rate(mut self, rate: f64) -> Self {
        self.config.receive_byte_loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the duplication rate.
    pub fn duplication_rate(mut self, rate: f64) -> Self {
        self.config.duplication_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the single-bit corruption rate.
    pub fn corruption_rate(mut self, rate: f64) -> Self {
        self.config.corruption_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the stray-byte injection rate and the most bytes injected at once.
    pub fn garbage(mut self, rate: f64, max_bytes: usize) -> Self {
        self.config.garbage_rate = rate.clamp(0.0, 1.0);
        self.config.max_garbage_bytes = max_bytes.max(1);
        self
    }

    /// Sets the reorder rate.
    pub fn reorder_rate(mut self, rate: f64) -> Self {
        self.config.reorder_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets burst loss: probability of a burst and frames lost per burst.
    pub fn burst_loss(mut self, probability: f64, length: usize) -> Self {
        self.config.burst_loss_probability = probability.clamp(0.0, 1.0);
        self.config.burst_loss_length = length;
        self
    }

    /// Sets the seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> ChaosConfig {
        self.config
    }
}

/// Counters kept by a [`ChaosTransport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaosStats {
    /// Frames handed to `send_to`
    pub frames_sent: u64,
    /// Frames dropped by random loss
    pub frames_dropped_send: u64,
    /// Burst loss events started
    pub burst_loss_events: u64,
    /// Frames dropped inside a burst
    pub frames_dropped_burst: u64,
    /// Frames sent twice
    pub frames_duplicated: u64,
    /// Frames with a flipped bit
    pub frames_corrupted: u64,
    /// Frames preceded by stray bytes
    pub garbage_injections: u64,
    /// Frames held back behind a later one
    pub frames_reordered: u64,
    /// Received bytes discarded
    pub bytes_dropped_receive: u64,
}

/// A [`Transport`] wrapper that damages traffic according to a [`ChaosConfig`].
///
/// Send-side faults apply per `send_to` call (one frame in practice).
/// Receive-side faults apply per byte.
pub struct ChaosTransport<T: Transport> {
    inner: T,
    config: ChaosConfig,
    rng: Pcg32,
    held: Option<(Vec<u8>, DeviceId)>,
    burst_loss_remaining: usize,
    stats: ChaosStats,
}

impl<T: Transport> ChaosTransport<T> {
    /// Wraps `inner`.
    pub fn new(inner: T, config: ChaosConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => Pcg32::seed_from_u64(seed),
            None => Pcg32::from_entropy(),
        };
        Self {
            inner,
            config,
            rng,
            held: None,
            burst_loss_remaining: 0,
            stats: ChaosStats::default(),
        }
    }

    /// Returns a reference to the inner transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Returns a mutable reference to the inner transport.
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consumes the wrapper, releasing any held frame first.
    pub fn into_inner(mut self) -> T {
        self.release_held();
        self.inner
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Replaces the configuration. The random stream continues.
    pub fn set_config(&mut self, config: ChaosConfig) {
        self.config = config;
    }

    /// Returns the counters.
    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    /// Resets the counters.
    pub fn reset_stats(&mut self) {
        self.stats = ChaosStats::default();
    }

    /// Whether a frame is currently held back for reordering.
    pub fn has_held_frame(&self) -> bool {
        self.held.is_some()
    }

    /// Sends any held frame now.
    pub fn release_held(&mut self) {
        if let Some((bytes, to)) = self.held.take() {
            self.inner.send_to(&bytes, to);
        }
    }

    fn roll(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            false
        } else {
            self.rng.gen_bool(rate)
        }
    }

    fn should_drop_burst(&mut self) -> bool {
        if self.burst_loss_remaining > 0 {
            self.burst_loss_remaining -= 1;
            self.stats.frames_dropped_burst += 1;
            return true;
        }
        if self.config.burst_loss_length > 0 && self.roll(self.config.burst_loss_probability) {
            self.stats.burst_loss_events += 1;
            self.burst_loss_remaining = self.config.burst_loss_length.saturating_sub(1);
            self.stats.frames_dropped_burst += 1;
            return true;
        }
        false
    }

    fn damage(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len() + self.config.max_garbage_bytes);
        if self.roll(self.config.garbage_rate) {
            self.stats.garbage_injections += 1;
            let count = self.rng.gen_range_usize(1..self.config.max_garbage_bytes.max(1) + 1);
            out.extend((0..count).map(|_| self.rng.next_u32() as u8));
        }
        let start = out.len();
        out.extend_from_slice(bytes);
        if !bytes.is_empty() && self.roll(self.config.corruption_rate) {
            self.stats.frames_corrupted += 1;
            let bit = self.rng.gen_range_usize(0..bytes.len() * 8);
            if let Some(byte) = out.get_mut(start + bit / 8) {
                *byte ^= 1 << (bit % 8);
            }
        }
        out
    }
}

impl<T: Transport> Transport for ChaosTransport<T> {
    fn send_to(&mut self, bytes: &[u8], to: DeviceId) {
        self.stats.frames_sent += 1;

        if self.should_drop_burst() {
            return;
        }
        if self.roll(self.config.send_loss_rate) {
            self.stats.frames_dropped_send += 1;
            return;
        }

        let wire = self.damage(bytes);
        let duplicate = self.roll(self.config.duplication_rate);

        if self.held.is_none() && self.roll(self.config.reorder_rate) {
            self.stats.frames_reordered += 1;
            self.held = Some((wire, to));
            return;
        }

        self.inner.send_to(&wire, to);
        if duplicate {
            self.stats.frames_duplicated += 1;
            self.inner.send_to(&wire, to);
        }
        self.release_held();
    }

    fn receive_all_bytes(&mut self) -> Vec<u8> {
        let mut bytes = self.inner.receive_all_bytes();
        if self.config.receive_byte_loss_rate > 0.0 {
            let before = bytes.len();
            let rate = self.config.receive_byte_loss_rate;
            let rng = &mut self.rng;
            bytes.retain(|_| !rng.gen_bool(rate));
            self.stats.bytes_dropped_receive += (before - bytes.len()) as u64;
        }
        bytes
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for ChaosTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosTransport")
            .field("inner", &self.inner)
            .field("config", &self.config)
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
    use crate::network::codec::{decode_stream, encode};
    use crate::network::messages::codes;

    /// Records every send; hands back whatever the test queued.
    #[derive(Default)]
    struct TestTransport {
        sent: Vec<(Vec<u8>, DeviceId)>,
        to_receive: Vec<u8>,
    }

    impl Transport for TestTransport {
        fn send_to(&mut self, bytes: &[u8], to: DeviceId) {
            self.sent.push((bytes.to_vec(), to));
        }

        fn receive_all_bytes(&mut self) -> Vec<u8> {
            std::mem::take(&mut self.to_receive)
        }
    }

    fn frame(n: u16) -> [u8; 7] {
        encode(0x01, 0x00, codes::COUNTDOWN_TICK, n)
    }

    #[test]
    fn test_passthrough_mode() {
        let mut chaos = ChaosTransport::new(TestTransport::default(), ChaosConfig::passthrough());
        chaos.send_to(&frame(3), DeviceId::STICK1);

        assert_eq!(chaos.stats().frames_sent, 1);
        assert_eq!(chaos.inner().sent, vec![(frame(3).to_vec(), DeviceId::STICK1)]);
    }

    #[test]
    fn test_packet_loss_100_percent() {
        let config = ChaosConfig::builder().packet_loss_rate(1.0).seed(42).build();
        let mut chaos = ChaosTransport::new(TestTransport::default(), config);
        for n in 0..10 {
            chaos.send_to(&frame(n), DeviceId::STICK1);
        }
        assert_eq!(chaos.stats().frames_dropped_send, 10);
        assert!(chaos.inner().sent.is_empty());
    }

    #[test]
    fn test_packet_loss_partial() {
        let config = ChaosConfig::builder().packet_loss_rate(0.5).seed(42).build();
        let mut chaos = ChaosTransport::new(TestTransport::default(), config);
        for n in 0..1000 {
            chaos.send_to(&frame(n), DeviceId::STICK1);
        }
        let dropped = chaos.stats().frames_dropped_send;
        assert!((400..600).contains(&dropped), "dropped {dropped}");
        assert_eq!(chaos.inner().sent.len() as u64, 1000 - dropped);
    }

    #[test]
    fn test_corruption_is_caught_by_checksum() {
        let config = ChaosConfig::builder().corruption_rate(1.0).seed(7).build();
        let mut chaos = ChaosTransport::new(TestTransport::default(), config);
        for n in 0..50 {
            chaos.send_to(&frame(n), DeviceId::STICK1);
        }
        assert_eq!(chaos.stats().frames_corrupted, 50);
        for (n, (bytes, _)) in chaos.inner().sent.iter().enumerate() {
            let differing: u32 = bytes
                .iter()
                .zip(frame(n as u16).iter())
                .map(|(a, b)| (a ^ b).count_ones())
                .sum();
            assert_eq!(differing, 1);
        }
        // Single-bit damage never yields a valid frame with the original payload
        let all: Vec<u8> = chaos.inner().sent.iter().flat_map(|(b, _)| b.clone()).collect();
        let survivors = decode_stream(&all);
        assert!(survivors.len() < 50);
    }

    #[test]
    fn test_garbage_prefix_is_skipped_by_decoder() {
        let config = ChaosConfig::builder().garbage(1.0, 4).seed(9).build();
        let mut chaos = ChaosTransport::new(TestTransport::default(), config);
        for n in 0..20 {
            chaos.send_to(&frame(n), DeviceId::STICK1);
        }
        let all: Vec<u8> = chaos.inner().sent.iter().flat_map(|(b, _)| b.clone()).collect();
        assert!(all.len() > 20 * 7);
        // Stray bytes may forge a start marker but frames still come through
        let frames = decode_stream(&all);
        assert!(frames.len() >= 18, "recovered {}", frames.len());
    }

    #[test]
    fn test_duplication() {
        let config = ChaosConfig::builder().duplication_rate(1.0).seed(1).build();
        let mut chaos = ChaosTransport::new(TestTransport::default(), config);
        chaos.send_to(&frame(1), DeviceId::STICK1);
        assert_eq!(chaos.inner().sent.len(), 2);
        assert_eq!(chaos.stats().frames_duplicated, 1);
    }

    #[test]
    fn test_reorder_swaps_adjacent_frames() {
        let config = ChaosConfig::builder().reorder_rate(1.0).seed(3).build();
        let mut chaos = ChaosTransport::new(TestTransport::default(), config);
        chaos.send_to(&frame(1), DeviceId::STICK1);
        assert!(chaos.has_held_frame());
        assert!(chaos.inner().sent.is_empty());

        chaos.send_to(&frame(2), DeviceId::STICK1);
        let sent: Vec<_> = chaos.inner().sent.iter().map(|(b, _)| b.clone()).collect();
        assert_eq!(sent, vec![frame(2).to_vec(), frame(1).to_vec()]);
        assert!(!chaos.has_held_frame());
    }

    #[test]
    fn test_into_inner_releases_held_frame() {
        let config = ChaosConfig::builder().reorder_rate(1.0).seed(3).build();
        let mut chaos = ChaosTransport::new(TestTransport::default(), config);
        chaos.send_to(&frame(1), DeviceId::STICK1);
        let inner = chaos.into_inner();
        assert_eq!(inner.sent.len(), 1);
    }

    #[test]
    fn test_burst_loss() {
        let config = ChaosConfig::builder().burst_loss(1.0, 5).seed(5).build();
        let mut chaos = ChaosTransport::new(TestTransport::default(), config);
        for n in 0..5 {
            chaos.send_to(&frame(n), DeviceId::STICK1);
        }
        assert_eq!(chaos.stats().burst_loss_events, 1);
        assert_eq!(chaos.stats().frames_dropped_burst, 5);
        assert!(chaos.inner().sent.is_empty());
    }

    #[test]
    fn test_receive_byte_loss() {
        let config = ChaosConfig::builder().receive_byte_loss_rate(1.0).seed(2).build();
        let mut chaos = ChaosTransport::new(TestTransport::default(), config);
        chaos.inner_mut().to_receive = frame(1).to_vec();
        assert!(chaos.receive_all_bytes().is_empty());
        assert_eq!(chaos.stats().bytes_dropped_receive, 7);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let run = || {
            let mut chaos =
                ChaosTransport::new(TestTransport::default(), ChaosConfig {
                    seed: Some(1234),
                    ..ChaosConfig::hostile_radio()
                });
            for n in 0..200 {
                chaos.send_to(&frame(n), DeviceId::STICK1);
            }
            chaos.into_inner().sent
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_rate_clamping() {
        let config = ChaosConfig::builder()
            .packet_loss_rate(1.5)
            .corruption_rate(-0.5)
            .build();
        assert!((config.send_loss_rate - 1.0).abs() < f64::EPSILON);
        assert!(config.corruption_rate.abs() < f64::EPSILON);
        assert!((ChaosConfig::lossy(2.0).send_loss_rate - 1.0).abs() < f64::EPSILON);
    }
}
