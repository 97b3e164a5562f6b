//! Shake counting from raw accelerometer samples.
//!
//! Gravity is tracked with a slow exponential low pass per axis, kept in Q8
//! fixed point:
//!
//! ```text
//! lpf += ((raw << 8) - lpf) >> shift        // shift 6: weight 1/64
//! dynamic = raw - (lpf >> 8)
//! energy  = |dynamic_x| + |dynamic_z|
//! ```
//!
//! A shake is one full swing: energy rises above the high threshold (armed),
//! then falls below the low threshold (counted). Noise that stays above the
//! high threshold after arming, or wobbles between the two thresholds, counts
//! nothing.

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;

/// One accelerometer reading in raw sensor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccelSample {
    /// X axis.
    pub x: i16,
    /// Y axis. Not used by the detector.
    pub y: i16,
    /// Z axis.
    pub z: i16,
}

impl AccelSample {
    /// Creates a sample.
    #[must_use]
    pub const fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }
}

/// Hysteresis shake counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShakeDetector {
    config: DetectorConfig,
    /// Gravity estimate per axis in Q8; `None` until the first sample.
    gravity: Option<(i32, i32)>,
    armed: bool,
    count: u8,
    last_energy: i32,
}

impl ShakeDetector {
    /// A detector with no history.
    #[must_use]
    pub const fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            gravity: None,
            armed: false,
            count: 0,
            last_energy: 0,
        }
    }

    /// Back to zero shakes; the next sample reseeds the gravity estimate.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    /// Feeds one sample. Returns `true` when it completed a shake.
    ///
    /// The first sample after a reset only seeds the low pass.
    pub fn update(&mut self, sample: AccelSample) -> bool {
        let raw_x = i32::from(sample.x);
        let raw_z = i32::from(sample.z);
        let Some((lpf_x, lpf_z)) = self.gravity else {
            self.gravity = Some((raw_x << 8, raw_z << 8));
            return false;
        };
        let shift = u32::from(self.config.filter_shift);
        let lpf_x = lpf_x + (((raw_x << 8) - lpf_x) >> shift);
        let lpf_z = lpf_z + (((raw_z << 8) - lpf_z) >> shift);
        self.gravity = Some((lpf_x, lpf_z));

        let energy = (raw_x - (lpf_x >> 8)).abs() + (raw_z - (lpf_z >> 8)).abs();
        self.last_energy = energy;
        self.observe(energy)
    }

    /// Runs the hysteresis on a precomputed energy value.
    pub fn observe(&mut self, energy: i32) -> bool {
        if !self.armed {
            if energy > self.config.high_threshold {
                self.armed = true;
            }
            false
        } else if energy < self.config.low_threshold {
            self.armed = false;
            self.count = self.count.saturating_add(1);
            true
        } else {
            false
        }
    }

    /// Shakes counted since the last reset.
    #[must_use]
    pub const fn count(&self) -> u8 {
        self.count
    }

    /// A swing is in progress.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Energy of the most recent sample.
    #[must_use]
    pub const fn last_energy(&self) -> i32 {
        self.last_energy
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
    use proptest::prelude::*;

    fn detector() -> ShakeDetector {
        ShakeDetector::new(DetectorConfig::default())
    }

    #[test]
    fn still_sensor_counts_nothing() {
        let mut shake = detector();
        for _ in 0..500 {
            assert!(!shake.update(AccelSample::new(120, -40, 16_384)));
        }
        assert_eq!(shake.count(), 0);
        assert_eq!(shake.last_energy(), 0);
    }

    #[test]
    fn one_swing_counts_once() {
        let mut shake = detector();
        shake.update(AccelSample::new(0, 0, 16_384));
        // push
        assert!(!shake.update(AccelSample::new(9_000, 0, 16_384)));
        assert!(shake.is_armed());
        // pull back to rest
        assert!(shake.update(AccelSample::new(0, 0, 16_384)));
        assert_eq!(shake.count(), 1);
        assert!(!shake.is_armed());
    }

    #[test]
    fn thresholds_are_strict() {
        let mut shake = detector();
        shake.observe(6000);
        assert!(!shake.is_armed());
        shake.observe(6001);
        assert!(shake.is_armed());
        assert!(!shake.observe(2000));
        assert!(shake.observe(1999));
    }

    #[test]
    fn noise_above_high_after_arming_counts_once() {
        let mut shake = detector();
        let trace = [7000, 6500, 9000, 6100, 12_000, 6001, 8000, 1500];
        let counted = trace.iter().filter(|energy| shake.observe(**energy)).count();
        assert_eq!(counted, 1);
        assert_eq!(shake.count(), 1);
    }

    #[test]
    fn reset_reseeds_gravity() {
        let mut shake = detector();
        shake.update(AccelSample::new(0, 0, 0));
        shake.observe(7000);
        shake.observe(100);
        shake.reset();
        assert_eq!(shake.count(), 0);
        // first sample after reset only seeds, however large
        assert!(!shake.update(AccelSample::new(20_000, 0, 20_000)));
        assert!(!shake.is_armed());
    }

    proptest! {
        /// Noise confined strictly above the high threshold after arming,
        /// then one drop below the low threshold, counts exactly one shake.
        #[test]
        fn prop_noisy_peak_counts_exactly_once(
            noise in proptest::collection::vec(6001i32..30_000, 0..50),
            low in 0i32..2000,
        ) {
            let mut shake = detector();
            prop_assert!(!shake.observe(7000));
            for energy in noise {
                prop_assert!(!shake.observe(energy));
            }
            prop_assert!(shake.observe(low));
            prop_assert_eq!(shake.count(), 1);
        }

        /// Wobble between the thresholds never counts.
        #[test]
        fn prop_band_wobble_counts_nothing(
            trace in proptest::collection::vec(2000i32..=6000, 0..100),
        ) {
            let mut shake = detector();
            for energy in trace {
                prop_assert!(!shake.observe(energy));
            }
            prop_assert_eq!(shake.count(), 0);
        }

        /// Counts never exceed the number of high-to-low crossings.
        #[test]
        fn prop_count_bounded_by_swings(
            trace in proptest::collection::vec(0i32..20_000, 0..200),
        ) {
            let mut shake = detector();
            let mut rises = 0u32;
            let mut was_high = false;
            for energy in &trace {
                let high = *energy > 6000;
                if high && !was_high {
                    rises += 1;
                }
                was_high = high;
                shake.observe(*energy);
            }
            prop_assert!(u32::from(shake.count()) <= rises);
        }
    }
}
