//! # Reflex Duel
//!
//! Control core for a physical multiplayer reaction game: up to four handheld
//! wireless controllers, a coordinator and an optional status display talk over a
//! lossy radio link using fixed 7-byte CRC-checked frames.
//!
//! The crate is split along the devices that run it:
//!
//! - [`network`]: the frame codec, typed messages, ACK/retry delivery and the
//!   [`Transport`] seam (loopback, UDP and fault injection).
//! - [`orchestrator`]: the coordinator's round-by-round state machine.
//! - [`peer`]: each controller's timing unit and shake detector.
//! - [`display`]: the display-side consumer of coordinator commands.
//! - [`boundary`]: the lock-guarded snapshot that lets a concurrently scheduled
//!   renderer observe the coordinator without racing it.
//!
//! Nothing in the game loop blocks or fails. Time is always supplied by the
//! caller as a [`web_time::Instant`], so every state machine can be driven
//! deterministically from tests.
//!
//! # Example
//!
//! ```
//! use reflex_duel::network::codec::{decode, encode};
//! use reflex_duel::network::messages::Message;
//!
//! let bytes = encode(0x00, 0x01, 0x26, 120);
//! let message = Message::try_from(decode(&bytes).unwrap()).unwrap();
//! assert_eq!(message.src, reflex_duel::DeviceId::STICK1);
//! ```

#![forbid(unsafe_code)] // let us try
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use boundary::{RenderSnapshot, StateBoundary};
pub use config::{DeliveryConfig, DetectorConfig, GameConfig, PeerConfig, TimingConfig};
pub use display::{DisplayModel, DisplayUnit};
pub use error::DuelError;
pub use network::chaos::{ChaosConfig, ChaosConfigBuilder, ChaosStats, ChaosTransport};
pub use network::codec::{Frame, FrameDecoder};
pub use network::delivery::{DeliveryStats, ReliableSender};
pub use network::loopback::LoopbackBus;
pub use network::messages::{DisplayCommand, GameMode, Message, MessageBody};
pub use network::transport::{Endpoint, Transport};
pub use network::udp::UdpTransport;
pub use orchestrator::outputs::{LedScene, SoundCue, UiCommand, ZoneColor, ZoneLayout};
pub use orchestrator::{GameEvent, GamePhase, Orchestrator};
pub use peer::{AccelSample, PeerInputs, PeerState, PeerTimingUnit};

pub mod boundary;
/// CRC-8 used for frame integrity.
pub mod checksum;
pub mod config;
pub mod display;
#[doc(hidden)]
pub mod error;
pub mod orchestrator;
pub mod peer;
/// Internal random number generator module based on PCG32.
///
/// Drives mode and delay selection on the coordinator and fault injection in
/// [`ChaosTransport`]. Seeded explicitly so whole games are reproducible.
pub mod rng;
#[doc(hidden)]
pub mod sync;
pub mod telemetry;

/// Everything between raw bytes and typed messages.
pub mod network {
    /// Fault-injecting transport wrapper.
    pub mod chaos;
    /// Fixed-size frame codec with a resynchronizing stream decoder.
    pub mod codec;
    /// Per-destination ACK/retry delivery.
    pub mod delivery;
    /// In-memory shared medium.
    pub mod loopback;
    /// Typed messages and the command code table.
    pub mod messages;
    /// The transport seam and the decoding endpoint built on it.
    pub mod transport;
    /// UDP transport with a device address table.
    pub mod udp;
}

// #############
// # CONSTANTS #
// #############

/// Number of player slots.
pub const MAX_SLOTS: usize = 4;

/// Wire value reserved for "penalized or timed out".
pub const PENALTY_SENTINEL: u16 = 0xFFFF;

/// Largest numeric result. One below [`PENALTY_SENTINEL`].
pub const MAX_RESULT_MS: u16 = 0xFFFE;

/// Address of a device on the link.
///
/// The address space is fixed: the coordinator, four controllers, one display
/// and the broadcast address. Any other value can still appear on the wire
/// (it decodes fine) but is unknown to every consumer.
///
/// # Examples
///
/// ```
/// use reflex_duel::DeviceId;
///
/// let stick = DeviceId::stick(3).unwrap();
/// assert_eq!(stick, DeviceId::STICK3);
/// assert_eq!(stick.controller_number(), Some(3));
/// assert!(!DeviceId::DISPLAY.is_controller());
/// assert_eq!(DeviceId::stick(5), None);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct DeviceId(u8);

impl DeviceId {
    /// The coordinator.
    pub const HOST: Self = Self(0x00);
    /// Controller 1.
    pub const STICK1: Self = Self(0x01);
    /// Controller 2.
    pub const STICK2: Self = Self(0x02);
    /// Controller 3.
    pub const STICK3: Self = Self(0x03);
    /// Controller 4.
    pub const STICK4: Self = Self(0x04);
    /// The status display.
    pub const DISPLAY: Self = Self(0x05);
    /// Every device.
    pub const BROADCAST: Self = Self(0xFF);

    /// All controller ids in order.
    pub const CONTROLLERS: [Self; 4] = [Self::STICK1, Self::STICK2, Self::STICK3, Self::STICK4];

    /// Wraps a raw address. Unknown values are accepted.
    #[inline]
    #[must_use]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Returns the controller with the given 1-based number.
    #[must_use]
    pub const fn stick(number: u8) -> Option<Self> {
        if number >= 1 && number <= 4 {
            Some(Self(number))
        } else {
            None
        }
    }

    /// The raw address.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns `true` for controllers 1 to 4.
    #[inline]
    #[must_use]
    pub const fn is_controller(self) -> bool {
        self.0 >= 0x01 && self.0 <= 0x04
    }

    /// 1-based controller number, if this is a controller.
    #[must_use]
    pub const fn controller_number(self) -> Option<u8> {
        if self.is_controller() {
            Some(self.0)
        } else {
            None
        }
    }

    /// Returns `true` for any id in the fixed address space.
    #[must_use]
    pub const fn is_known(self) -> bool {
        self.0 <= 0x05 || self.0 == 0xFF
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::HOST => write!(f, "host"),
            Self::DISPLAY => write!(f, "display"),
            Self::BROADCAST => write!(f, "broadcast"),
            id if id.is_controller() => write!(f, "stick{}", id.0),
            id => write!(f, "0x{:02X}", id.0),
        }
    }
}

/// One of the four fixed player positions.
///
/// Slots are numbered 1 to 4 on the wire and to players; [`Slot::index`] gives
/// the 0-based position for table lookups. A slot is independent of which
/// controller fills it.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Slot(u8);

impl Slot {
    /// Every slot in prompt order.
    pub const ALL: [Self; MAX_SLOTS] = [Self(0), Self(1), Self(2), Self(3)];

    /// Slot from a 1-based number.
    #[must_use]
    pub const fn from_number(number: u8) -> Option<Self> {
        if number >= 1 && number as usize <= MAX_SLOTS {
            Some(Self(number - 1))
        } else {
            None
        }
    }

    /// Slot from a 0-based index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < MAX_SLOTS {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    /// 1-based number.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0 + 1
    }

    /// 0-based index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot {}", self.number())
    }
}

/// A round result: a time in whole milliseconds, or the penalty.
///
/// Ordering puts every numeric time before the penalty, so the lowest result
/// is always the best one.
///
/// # Examples
///
/// ```
/// use reflex_duel::ResultTime;
/// use web_time::Duration;
///
/// assert_eq!(ResultTime::from_elapsed(Duration::from_micros(300)), ResultTime::Millis(1));
/// assert_eq!(ResultTime::from_wire(0xFFFF), ResultTime::Penalty);
/// assert!(ResultTime::Millis(0xFFFE) < ResultTime::Penalty);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum ResultTime {
    /// Measured time.
    Millis(u16),
    /// Disqualified or timed out.
    Penalty,
}

impl ResultTime {
    /// Converts an elapsed duration, clamping to `1..=MAX_RESULT_MS`.
    #[must_use]
    pub fn from_elapsed(elapsed: web_time::Duration) -> Self {
        let millis = elapsed.as_micros() / 1000;
        let clamped = millis.clamp(1, u128::from(MAX_RESULT_MS));
        Self::Millis(clamped as u16)
    }

    /// Parses a wire value.
    #[must_use]
    pub const fn from_wire(value: u16) -> Self {
        if value == PENALTY_SENTINEL {
            Self::Penalty
        } else {
            Self::Millis(value)
        }
    }

    /// Wire value.
    #[must_use]
    pub const fn to_wire(self) -> u16 {
        match self {
            Self::Millis(ms) => ms,
            Self::Penalty => PENALTY_SENTINEL,
        }
    }

    /// Returns `true` for the penalty.
    #[must_use]
    pub const fn is_penalty(self) -> bool {
        matches!(self, Self::Penalty)
    }

    /// The numeric time, if any.
    #[must_use]
    pub const fn millis(self) -> Option<u16> {
        match self {
            Self::Millis(ms) => Some(ms),
            Self::Penalty => None,
        }
    }
}

impl std::fmt::Display for ResultTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "{} ms", ms),
            Self::Penalty => write!(f, "penalty"),
        }
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
    use web_time::Duration;

    #[test]
    fn device_id_display() {
        assert_eq!(DeviceId::HOST.to_string(), "host");
        assert_eq!(DeviceId::STICK2.to_string(), "stick2");
        assert_eq!(DeviceId::new(0x42).to_string(), "0x42");
        assert!(!DeviceId::new(0x42).is_known());
        assert!(DeviceId::BROADCAST.is_known());
    }

    #[test]
    fn slot_number_and_index_agree() {
        for (index, slot) in Slot::ALL.iter().enumerate() {
            assert_eq!(slot.index(), index);
            assert_eq!(Slot::from_number(slot.number()), Some(*slot));
            assert_eq!(Slot::from_index(index), Some(*slot));
        }
        assert_eq!(Slot::from_number(0), None);
        assert_eq!(Slot::from_number(5), None);
        assert_eq!(Slot::from_index(4), None);
    }

    #[test]
    fn zero_elapsed_reports_one_millisecond() {
        assert_eq!(
            ResultTime::from_elapsed(Duration::ZERO),
            ResultTime::Millis(1)
        );
    }

    #[test]
    fn elapsed_truncates_to_whole_milliseconds() {
        assert_eq!(
            ResultTime::from_elapsed(Duration::from_micros(120_999)),
            ResultTime::Millis(120)
        );
    }

    #[test]
    fn long_elapsed_saturates_below_sentinel() {
        assert_eq!(
            ResultTime::from_elapsed(Duration::from_secs(600)),
            ResultTime::Millis(MAX_RESULT_MS)
        );
    }

    #[test]
    fn results_order_fastest_first_penalty_last() {
        let mut results = [
            ResultTime::Penalty,
            ResultTime::Millis(120),
            ResultTime::Millis(95),
        ];
        results.sort();
        assert_eq!(
            results,
            [
                ResultTime::Millis(95),
                ResultTime::Millis(120),
                ResultTime::Penalty
            ]
        );
    }
}
