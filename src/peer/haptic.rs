//! Vibration motor timing.

use web_time::{Duration, Instant};

/// A motor that runs until a deadline. A new pulse replaces the running one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HapticMotor {
    until: Option<Instant>,
    pulses: u32,
}

impl HapticMotor {
    /// A stopped motor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            until: None,
            pulses: 0,
        }
    }

    /// Runs the motor for `duration` from `now`. A zero duration stops it.
    pub fn start(&mut self, now: Instant, duration: Duration) {
        if duration.is_zero() {
            self.until = None;
            return;
        }
        self.until = Some(now + duration);
        self.pulses = self.pulses.wrapping_add(1);
    }

    /// Stops the motor once its deadline has passed. Returns whether it is
    /// still running.
    pub fn update(&mut self, now: Instant) -> bool {
        if self.until.is_some_and(|until| now >= until) {
            self.until = None;
        }
        self.until.is_some()
    }

    /// Whether the motor is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.until.is_some()
    }

    /// Pulses started so far.
    #[must_use]
    pub const fn pulses(&self) -> u32 {
        self.pulses
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
    fn pulse_runs_until_deadline() {
        let t0 = Instant::now();
        let mut motor = HapticMotor::new();
        motor.start(t0, Duration::from_millis(200));
        assert!(motor.update(t0 + Duration::from_millis(199)));
        assert!(!motor.update(t0 + Duration::from_millis(200)));
        assert_eq!(motor.pulses(), 1);
    }

    #[test]
    fn newer_pulse_replaces_running_one() {
        let t0 = Instant::now();
        let mut motor = HapticMotor::new();
        motor.start(t0, Duration::from_millis(500));
        motor.start(t0 + Duration::from_millis(10), Duration::from_millis(100));
        assert!(!motor.update(t0 + Duration::from_millis(110)));
        assert_eq!(motor.pulses(), 2);
    }

    #[test]
    fn zero_duration_stops() {
        let t0 = Instant::now();
        let mut motor = HapticMotor::new();
        motor.start(t0, Duration::from_millis(500));
        motor.start(t0, Duration::ZERO);
        assert!(!motor.is_active());
    }
}
