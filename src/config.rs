//! Configuration for the coordinator, the controllers and the link.
//!
//! Every struct has a `Default` matching the reference hardware, a few named
//! presets, and a `validate()` that rejects values the state machines cannot
//! work with. Validation happens once at construction; the game loop itself
//! never re-checks.
//!
//! ```
//! use reflex_duel::{GameConfig, TimingConfig};
//!
//! let config = GameConfig {
//!     timing: TimingConfig::quick(),
//!     ..GameConfig::short()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.rounds, 3);
//! ```

use smallvec::{smallvec, SmallVec};
use web_time::Duration;

use crate::network::messages::{FirmwareVersion, GameMode};
use crate::orchestrator::outputs::ZoneLayout;
use crate::{DeviceId, DuelError};

/// Small fixed option set (never more than a handful of entries).
pub type OptionSet<T> = SmallVec<[T; 4]>;

fn check_range(field: &'static str, actual: u64, min: u64, max: u64) -> Result<(), DuelError> {
    if actual < min || actual > max {
        return Err(DuelError::ConfigValueOutOfRange {
            field,
            min,
            max,
            actual,
        });
    }
    Ok(())
}

fn check_millis(
    field: &'static str,
    value: Duration,
    min_ms: u64,
    max_ms: u64,
) -> Result<(), DuelError> {
    check_range(field, value.as_millis() as u64, min_ms, max_ms)
}

/// Dwell times and timeouts of the coordinator phases.
///
/// # Example
///
/// ```
/// use reflex_duel::TimingConfig;
/// use web_time::Duration;
///
/// let slow_prompts = TimingConfig {
///     prompt_timeout: Duration::from_secs(8),
///     ..TimingConfig::default()
/// };
/// assert!(slow_prompts.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "TimingConfig has no effect unless placed in a GameConfig"]
pub struct TimingConfig {
    /// Time spent in Idle before prompting.
    ///
    /// Default: 3000ms
    pub idle_dwell: Duration,
    /// How long each slot prompt stays open.
    ///
    /// Default: 5000ms
    pub prompt_timeout: Duration,
    /// Pause after the last claim before the game starts.
    ///
    /// Default: 1000ms
    pub join_settle: Duration,
    /// Announcement length of a reaction round.
    ///
    /// Default: 3000ms
    pub reaction_announce: Duration,
    /// Announcement length the first time reaction mode is played in a game,
    /// when the instructions are read out as well.
    ///
    /// Default: 7000ms
    pub reaction_announce_first: Duration,
    /// Announcement length of a shake round.
    ///
    /// Default: 4000ms
    pub shake_announce: Duration,
    /// First-time announcement length of a shake round.
    ///
    /// Default: 8500ms
    pub shake_announce_first: Duration,
    /// Spacing of the countdown ticks.
    ///
    /// Default: 1000ms
    pub countdown_tick: Duration,
    /// Length of the flash paired with each tick.
    ///
    /// Default: 200ms
    pub countdown_flash: Duration,
    /// Time to wait for reaction results after go.
    ///
    /// Default: 10000ms
    pub collect_timeout: Duration,
    /// Extra time unfinished slots get after the collection timeout.
    ///
    /// Default: 10000ms
    pub grace_window: Duration,
    /// Hard limit of a shake round on the coordinator.
    ///
    /// Default: 30000ms
    pub shake_timeout: Duration,
    /// Delay between individual times and the winner reveal.
    ///
    /// Default: 3000ms
    pub results_reveal: Duration,
    /// Total time in Results.
    ///
    /// Default: 6000ms
    pub results_dwell: Duration,
    /// Time the final winner stays up.
    ///
    /// Default: 15000ms
    pub final_dwell: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            idle_dwell: Duration::from_millis(3000),
            prompt_timeout: Duration::from_millis(5000),
            join_settle: Duration::from_millis(1000),
            reaction_announce: Duration::from_millis(3000),
            reaction_announce_first: Duration::from_millis(7000),
            shake_announce: Duration::from_millis(4000),
            shake_announce_first: Duration::from_millis(8500),
            countdown_tick: Duration::from_millis(1000),
            countdown_flash: Duration::from_millis(200),
            collect_timeout: Duration::from_millis(10000),
            grace_window: Duration::from_millis(10000),
            shake_timeout: Duration::from_millis(30000),
            results_reveal: Duration::from_millis(3000),
            results_dwell: Duration::from_millis(6000),
            final_dwell: Duration::from_millis(15000),
        }
    }
}

impl TimingConfig {
    /// Creates a new `TimingConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Short dwells for demos and simulations.
    ///
    /// Announcements and results flash by; the collection and shake timeouts
    /// stay long enough for a real player.
    pub fn quick() -> Self {
        Self {
            idle_dwell: Duration::from_millis(300),
            prompt_timeout: Duration::from_millis(1500),
            join_settle: Duration::from_millis(200),
            reaction_announce: Duration::from_millis(300),
            reaction_announce_first: Duration::from_millis(600),
            shake_announce: Duration::from_millis(300),
            shake_announce_first: Duration::from_millis(600),
            countdown_tick: Duration::from_millis(250),
            countdown_flash: Duration::from_millis(50),
            collect_timeout: Duration::from_millis(5000),
            grace_window: Duration::from_millis(2000),
            shake_timeout: Duration::from_millis(15000),
            results_reveal: Duration::from_millis(300),
            results_dwell: Duration::from_millis(600),
            final_dwell: Duration::from_millis(1000),
        }
    }

    /// Validates the timing configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::ConfigValueOutOfRange`] for zero or absurd durations,
    /// a flash that outlasts its tick, or a reveal after the end of Results.
    pub fn validate(&self) -> Result<(), DuelError> {
        const MAX_MS: u64 = 600_000;
        check_millis("idle_dwell", self.idle_dwell, 0, MAX_MS)?;
        check_millis("prompt_timeout", self.prompt_timeout, 1, MAX_MS)?;
        check_millis("join_settle", self.join_settle, 0, MAX_MS)?;
        check_millis("reaction_announce", self.reaction_announce, 0, MAX_MS)?;
        check_millis(
            "reaction_announce_first",
            self.reaction_announce_first,
            0,
            MAX_MS,
        )?;
        check_millis("shake_announce", self.shake_announce, 0, MAX_MS)?;
        check_millis("shake_announce_first", self.shake_announce_first, 0, MAX_MS)?;
        check_millis("countdown_tick", self.countdown_tick, 1, MAX_MS)?;
        check_millis(
            "countdown_flash",
            self.countdown_flash,
            0,
            self.countdown_tick.as_millis() as u64,
        )?;
        check_millis("collect_timeout", self.collect_timeout, 1, MAX_MS)?;
        check_millis("grace_window", self.grace_window, 0, MAX_MS)?;
        check_millis("shake_timeout", self.shake_timeout, 1, MAX_MS)?;
        check_millis("results_dwell", self.results_dwell, 1, MAX_MS)?;
        check_millis(
            "results_reveal",
            self.results_reveal,
            0,
            self.results_dwell.as_millis() as u64,
        )?;
        check_millis("final_dwell", self.final_dwell, 0, MAX_MS)?;
        Ok(())
    }
}

/// Retry policy of reliable delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "DeliveryConfig has no effect unless passed to a ReliableSender"]
pub struct DeliveryConfig {
    /// Minimum age of a pending command before it is sent again.
    ///
    /// Default: 50ms
    pub retry_interval: Duration,
    /// Retransmissions after the first send before the command is dropped.
    ///
    /// Default: 3
    pub max_retries: u8,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(50),
            max_retries: 3,
        }
    }
}

impl DeliveryConfig {
    /// Creates a new `DeliveryConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for noisy links: more retransmissions, slightly faster.
    pub fn lossy() -> Self {
        Self {
            retry_interval: Duration::from_millis(40),
            max_retries: 8,
        }
    }

    /// Validates the delivery configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::ConfigValueOutOfRange`] if the interval is outside
    /// 1..=10000 ms or the retry budget outside 1..=16.
    pub fn validate(&self) -> Result<(), DuelError> {
        check_millis("retry_interval", self.retry_interval, 1, 10_000)?;
        check_range("max_retries", u64::from(self.max_retries), 1, 16)?;
        Ok(())
    }
}

/// Everything the coordinator needs to run a game.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "GameConfig has no effect unless passed to Orchestrator::new()"]
pub struct GameConfig {
    /// Regular rounds per game.
    ///
    /// Default: 5
    pub rounds: u8,
    /// Fewest bound slots that can start a game.
    ///
    /// Default: 2
    pub min_players: u8,
    /// Run sudden-death rounds when exactly two slots tie for the top score.
    ///
    /// Default: true
    pub tie_break: bool,
    /// Score lead that ends a tie-break.
    ///
    /// Default: 2
    pub tie_break_lead: u8,
    /// Contents of the mode shuffle bag. Every mode in it is played once
    /// before any repeats.
    ///
    /// Default: {reaction, shake}
    pub modes: OptionSet<GameMode>,
    /// Pre-signal waits of reaction rounds.
    ///
    /// Default: {10s, 15s, 20s}
    pub reaction_delays: OptionSet<Duration>,
    /// Shake counts of shake rounds.
    ///
    /// Default: {10, 15, 20}
    pub shake_targets: OptionSet<u8>,
    /// Physical slot to LED zone wiring.
    ///
    /// Default: [`ZoneLayout::Reversed`]
    pub zone_layout: ZoneLayout,
    /// Blink the red override of slots that time out in a shake round instead
    /// of holding it solid.
    ///
    /// Default: false
    pub shake_timeout_blink: bool,
    /// Phase durations.
    pub timing: TimingConfig,
    /// Retry policy for reliable commands.
    pub delivery: DeliveryConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            rounds: 5,
            min_players: 2,
            tie_break: true,
            tie_break_lead: 2,
            modes: smallvec![GameMode::Reaction, GameMode::Shake],
            reaction_delays: smallvec![
                Duration::from_millis(10_000),
                Duration::from_millis(15_000),
                Duration::from_millis(20_000),
            ],
            shake_targets: smallvec![10, 15, 20],
            zone_layout: ZoneLayout::Reversed,
            shake_timeout_blink: false,
            timing: TimingConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl GameConfig {
    /// Creates a new `GameConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Three-round games.
    pub fn short() -> Self {
        Self {
            rounds: 3,
            ..Self::default()
        }
    }

    /// Validates the game configuration, including the nested timing and
    /// delivery settings.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::ConfigValueOutOfRange`] for zero rounds, a minimum
    /// player count outside 2..=4, a zero tie-break lead, or a shake target of 0
    /// or 255, and [`DuelError::InvalidRequest`] for an empty option set.
    pub fn validate(&self) -> Result<(), DuelError> {
        check_range("rounds", u64::from(self.rounds), 1, 99)?;
        check_range(
            "min_players",
            u64::from(self.min_players),
            2,
            crate::MAX_SLOTS as u64,
        )?;
        check_range("tie_break_lead", u64::from(self.tie_break_lead), 1, 10)?;
        if self.modes.is_empty() {
            return Err(DuelError::InvalidRequest {
                info: "modes must contain at least one option".to_owned(),
            });
        }
        if self.reaction_delays.is_empty() {
            return Err(DuelError::InvalidRequest {
                info: "reaction_delays must contain at least one option".to_owned(),
            });
        }
        if self.shake_targets.is_empty() {
            return Err(DuelError::InvalidRequest {
                info: "shake_targets must contain at least one option".to_owned(),
            });
        }
        for delay in &self.reaction_delays {
            check_millis("reaction_delays", *delay, 0, 600_000)?;
        }
        for target in &self.shake_targets {
            check_range("shake_targets", u64::from(*target), 1, 254)?;
        }
        self.timing.validate()?;
        self.delivery.validate()?;
        Ok(())
    }
}

/// Thresholds of the shake detector.
///
/// Energies are in raw accelerometer units (the sum of the X and Z dynamic
/// components); only the gravity estimate is kept in Q8 fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "DetectorConfig has no effect unless placed in a PeerConfig"]
pub struct DetectorConfig {
    /// Energy above which a shake is armed.
    ///
    /// Default: 6000
    pub high_threshold: i32,
    /// Energy below which an armed shake is counted.
    ///
    /// Default: 2000
    pub low_threshold: i32,
    /// Low-pass weight as a right shift; 6 means 1/64 per sample.
    ///
    /// Default: 6
    pub filter_shift: u8,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            high_threshold: 6000,
            low_threshold: 2000,
            filter_shift: 6,
        }
    }
}

impl DetectorConfig {
    /// Validates the detector thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::InvalidRequest`] if the low threshold is not below
    /// the high one, and [`DuelError::ConfigValueOutOfRange`] for a filter shift
    /// outside 1..=15.
    pub fn validate(&self) -> Result<(), DuelError> {
        if self.low_threshold < 0 || self.low_threshold >= self.high_threshold {
            return Err(DuelError::InvalidRequest {
                info: format!(
                    "low_threshold ({}) must be non-negative and below high_threshold ({})",
                    self.low_threshold, self.high_threshold
                ),
            });
        }
        check_range("filter_shift", u64::from(self.filter_shift), 1, 15)?;
        Ok(())
    }
}

/// Configuration of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "PeerConfig has no effect unless passed to PeerTimingUnit::new()"]
pub struct PeerConfig {
    /// This controller's address.
    pub id: DeviceId,
    /// Firmware version announced in join requests.
    pub firmware: FirmwareVersion,
    /// Reaction rounds report the penalty after this long without a press.
    ///
    /// Default: 10000ms
    pub reaction_timeout: Duration,
    /// Shake rounds report the penalty after this long.
    ///
    /// Default: 30000ms
    pub shake_timeout: Duration,
    /// Button must read the same for this long to count as a press.
    ///
    /// Default: 50ms
    pub debounce: Duration,
    /// Pulse on join confirmation. Default: 200ms
    pub haptic_join: Duration,
    /// Pulse on go. Default: 500ms
    pub haptic_go: Duration,
    /// Pulse after a reaction result. Default: 100ms
    pub haptic_reaction_done: Duration,
    /// Pulse after a shake result. Default: 200ms
    pub haptic_shake_done: Duration,
    /// Pulse on each countdown tick. Default: 200ms
    pub haptic_countdown: Duration,
    /// Shake detector thresholds.
    pub detector: DetectorConfig,
}

impl PeerConfig {
    /// Default configuration for the controller at `id`.
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            firmware: FirmwareVersion::new(1, 0, 0),
            reaction_timeout: Duration::from_millis(10_000),
            shake_timeout: Duration::from_millis(30_000),
            debounce: Duration::from_millis(50),
            haptic_join: Duration::from_millis(200),
            haptic_go: Duration::from_millis(500),
            haptic_reaction_done: Duration::from_millis(100),
            haptic_shake_done: Duration::from_millis(200),
            haptic_countdown: Duration::from_millis(200),
            detector: DetectorConfig::default(),
        }
    }

    /// Validates the controller configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::InvalidRequest`] if `id` is not a controller address,
    /// and [`DuelError::ConfigValueOutOfRange`] for zero timeouts.
    pub fn validate(&self) -> Result<(), DuelError> {
        if !self.id.is_controller() {
            return Err(DuelError::InvalidRequest {
                info: format!("{} is not a controller address", self.id),
            });
        }
        check_millis("reaction_timeout", self.reaction_timeout, 1, 600_000)?;
        check_millis("shake_timeout", self.shake_timeout, 1, 600_000)?;
        check_millis("debounce", self.debounce, 0, 1000)?;
        self.detector.validate()
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

    #[test]
    fn defaults_and_presets_validate() {
        GameConfig::default().validate().unwrap();
        GameConfig::short().validate().unwrap();
        TimingConfig::quick().validate().unwrap();
        DeliveryConfig::lossy().validate().unwrap();
        PeerConfig::new(DeviceId::STICK1).validate().unwrap();
    }

    #[test]
    fn default_values_match_reference_hardware() {
        let config = GameConfig::default();
        assert_eq!(config.rounds, 5);
        assert_eq!(config.min_players, 2);
        assert_eq!(config.shake_targets.as_slice(), &[10, 15, 20]);
        assert_eq!(config.delivery.max_retries, 3);
        assert_eq!(config.delivery.retry_interval, Duration::from_millis(50));
        assert_eq!(config.timing.grace_window, Duration::from_millis(10_000));
    }

    #[test]
    fn zero_retries_rejected() {
        let config = DeliveryConfig {
            max_retries: 0,
            ..DeliveryConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(DuelError::ConfigValueOutOfRange {
                field: "max_retries",
                min: 1,
                max: 16,
                actual: 0,
            })
        );
    }

    #[test]
    fn zero_retry_interval_rejected() {
        let config = DeliveryConfig {
            retry_interval: Duration::ZERO,
            ..DeliveryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_option_sets_rejected() {
        let mut config = GameConfig::default();
        config.reaction_delays.clear();
        assert!(matches!(
            config.validate(),
            Err(DuelError::InvalidRequest { .. })
        ));

        let mut config = GameConfig::default();
        config.shake_targets.clear();
        assert!(config.validate().is_err());

        let mut config = GameConfig::default();
        config.modes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_players_outside_range_rejected() {
        for min_players in [0, 1, 5] {
            let config = GameConfig {
                min_players,
                ..GameConfig::default()
            };
            assert!(config.validate().is_err(), "min_players {min_players}");
        }
    }

    #[test]
    fn zero_rounds_rejected() {
        let config = GameConfig {
            rounds: 0,
            ..GameConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let detector = DetectorConfig {
            high_threshold: 2000,
            low_threshold: 6000,
            ..DetectorConfig::default()
        };
        assert!(detector.validate().is_err());
    }

    #[test]
    fn peer_config_requires_controller_id() {
        assert!(PeerConfig::new(DeviceId::DISPLAY).validate().is_err());
        assert!(PeerConfig::new(DeviceId::STICK4).validate().is_ok());
    }

    #[test]
    fn nested_timing_errors_surface() {
        let config = GameConfig {
            timing: TimingConfig {
                countdown_tick: Duration::ZERO,
                ..TimingConfig::default()
            },
            ..GameConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DuelError::ConfigValueOutOfRange {
                field: "countdown_tick",
                ..
            })
        ));
    }
}
