//! Round mode and parameter selection.
//!
//! Modes come out of a [`ShuffleBag`]: every mode is served once, in random
//! order, before the bag refills. Parameters (reaction delay, shake target)
//! come from a [`NoRepeatPicker`], which never serves the same option twice in
//! a row. Both keep short runs of rounds varied where plain random draws would
//! happily repeat.

use smallvec::SmallVec;
use web_time::Duration;

use crate::config::GameConfig;
use crate::network::messages::GameMode;
use crate::rng::Rng;

/// Options drawn without replacement until exhausted, then refilled and
/// reshuffled.
///
/// With `n` items, any aligned run of `n` draws contains every item once, and
/// no item can come up more than twice in a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleBag<T: Copy> {
    items: SmallVec<[T; 4]>,
    next: usize,
}

impl<T: Copy> ShuffleBag<T> {
    /// A bag over `items`. The first draw shuffles.
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        let items: SmallVec<[T; 4]> = items.into_iter().collect();
        let next = items.len();
        Self { items, next }
    }

    /// Draws the next item, refilling first if the bag is spent. `None` only
    /// for an empty bag.
    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<T> {
        if self.next >= self.items.len() {
            self.reshuffle(rng);
        }
        let item = self.items.get(self.next).copied()?;
        self.next += 1;
        Some(item)
    }

    /// Items left before the next refill.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.items.len().saturating_sub(self.next)
    }

    /// Forces a refill on the next draw.
    pub fn reset(&mut self) {
        self.next = self.items.len();
    }

    fn reshuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        // Fisher-Yates
        for i in (1..self.items.len()).rev() {
            let j = rng.gen_range_usize(0..i + 1);
            self.items.swap(i, j);
        }
        self.next = 0;
    }
}

/// Random index that differs from the previous one whenever more than one
/// option exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoRepeatPicker {
    last: Option<usize>,
}

impl NoRepeatPicker {
    /// A picker with no history.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Picks an index in `0..len`. Returns 0 for `len <= 1`.
    pub fn pick<R: Rng + ?Sized>(&mut self, rng: &mut R, len: usize) -> usize {
        let index = match (len, self.last) {
            (0 | 1, _) => 0,
            (_, Some(last)) if last < len => {
                // Draw from the other len - 1 options
                let drawn = rng.gen_range_usize(0..len - 1);
                if drawn >= last {
                    drawn + 1
                } else {
                    drawn
                }
            },
            _ => rng.gen_range_usize(0..len),
        };
        self.last = Some(index);
        index
    }

    /// The previous pick.
    #[must_use]
    pub const fn last(&self) -> Option<usize> {
        self.last
    }

    /// Forgets the previous pick.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// The mode of a round and its parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RoundConfig {
    /// Press as soon as the go arrives, which comes after `delay`.
    Reaction {
        /// Wait between the end of the announcements and the go.
        delay: Duration,
    },
    /// Shake `target` times.
    Shake {
        /// Shakes to count.
        target: u8,
    },
}

impl RoundConfig {
    /// The round's mode.
    #[must_use]
    pub const fn mode(&self) -> GameMode {
        match self {
            Self::Reaction { .. } => GameMode::Reaction,
            Self::Shake { .. } => GameMode::Shake,
        }
    }

    /// Parameter byte of round-start: the shake target, or 0.
    #[must_use]
    pub const fn wire_param(&self) -> u8 {
        match self {
            Self::Reaction { .. } => 0,
            Self::Shake { target } => *target,
        }
    }
}

/// The coordinator's round drawer: a mode bag plus one no-repeat picker per
/// parameter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSelector {
    modes: ShuffleBag<GameMode>,
    delays: NoRepeatPicker,
    targets: NoRepeatPicker,
}

impl RoundSelector {
    /// A selector over the option sets of `config`.
    pub fn new(config: &GameConfig) -> Self {
        Self {
            modes: ShuffleBag::new(config.modes.iter().copied()),
            delays: NoRepeatPicker::new(),
            targets: NoRepeatPicker::new(),
        }
    }

    /// Draws the next round.
    pub fn next_round<R: Rng + ?Sized>(&mut self, config: &GameConfig, rng: &mut R) -> RoundConfig {
        match self.modes.draw(rng).unwrap_or(GameMode::Reaction) {
            GameMode::Reaction => {
                let index = self.delays.pick(rng, config.reaction_delays.len());
                RoundConfig::Reaction {
                    delay: config
                        .reaction_delays
                        .get(index)
                        .copied()
                        .unwrap_or(Duration::from_millis(10_000)),
                }
            },
            GameMode::Shake => {
                let index = self.targets.pick(rng, config.shake_targets.len());
                RoundConfig::Shake {
                    target: config.shake_targets.get(index).copied().unwrap_or(10),
                }
            },
        }
    }

    /// Back to a fresh game: refill the bag and forget previous picks.
    pub fn reset(&mut self) {
        self.modes.reset();
        self.delays.reset();
        self.targets.reset();
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
    use crate::rng::{Pcg32, SeedableRng};
    use proptest::prelude::*;
    use smallvec::smallvec;

    #[test]
    fn empty_bag_draws_nothing() {
        let mut rng = Pcg32::seed_from_u64(1);
        let mut bag: ShuffleBag<u8> = ShuffleBag::new([]);
        assert_eq!(bag.draw(&mut rng), None);
    }

    #[test]
    fn single_option_picker_always_returns_zero() {
        let mut rng = Pcg32::seed_from_u64(1);
        let mut picker = NoRepeatPicker::new();
        for _ in 0..10 {
            assert_eq!(picker.pick(&mut rng, 1), 0);
        }
    }

    #[test]
    fn reset_refills_bag() {
        let mut rng = Pcg32::seed_from_u64(3);
        let mut bag = ShuffleBag::new([GameMode::Reaction, GameMode::Shake]);
        bag.draw(&mut rng);
        assert_eq!(bag.remaining(), 1);
        bag.reset();
        assert_eq!(bag.remaining(), 0);
        bag.draw(&mut rng);
        assert_eq!(bag.remaining(), 1);
    }

    #[test]
    fn selector_uses_configured_options() {
        let config = GameConfig {
            modes: smallvec![GameMode::Reaction],
            reaction_delays: smallvec![Duration::from_secs(10)],
            ..GameConfig::default()
        };
        let mut selector = RoundSelector::new(&config);
        let mut rng = Pcg32::seed_from_u64(99);
        for _ in 0..5 {
            assert_eq!(
                selector.next_round(&config, &mut rng),
                RoundConfig::Reaction {
                    delay: Duration::from_secs(10)
                }
            );
        }
    }

    #[test]
    fn round_config_wire_param() {
        assert_eq!(RoundConfig::Shake { target: 15 }.wire_param(), 15);
        assert_eq!(
            RoundConfig::Reaction {
                delay: Duration::from_secs(20)
            }
            .wire_param(),
            0
        );
    }

    proptest! {
        #[test]
        fn prop_mode_bag_serves_both_modes_per_cycle(seed in any::<u64>()) {
            let mut rng = Pcg32::seed_from_u64(seed);
            let mut bag = ShuffleBag::new([GameMode::Reaction, GameMode::Shake]);
            let picks: Vec<GameMode> = (0..40).map(|_| bag.draw(&mut rng).unwrap()).collect();
            for pair in picks.chunks(2) {
                prop_assert_ne!(pair[0], pair[1]);
            }
            for run in picks.windows(3) {
                prop_assert!(!(run[0] == run[1] && run[1] == run[2]));
            }
        }

        #[test]
        fn prop_picker_never_repeats(seed in any::<u64>(), len in 2usize..6) {
            let mut rng = Pcg32::seed_from_u64(seed);
            let mut picker = NoRepeatPicker::new();
            let mut previous = picker.pick(&mut rng, len);
            for _ in 0..50 {
                let next = picker.pick(&mut rng, len);
                prop_assert!(next < len);
                prop_assert_ne!(next, previous);
                previous = next;
            }
        }
    }
}
