//! Button input: the interrupt-side edge capture and the polled debouncer.

use web_time::{Duration, Instant};

use crate::sync::{AtomicBool, AtomicU64, Ordering};

/// One-shot timestamp of a button edge, written from interrupt context.
///
/// The interrupt handler calls [`on_press`](Self::on_press), which only stores
/// a timestamp and then raises a flag; the main loop reads the flag and then
/// the timestamp. Each is written once and read once per arming, so the
/// Release/Acquire pair on the flag is all the synchronization needed.
///
/// Timestamps are kept as microseconds since `epoch` so they fit an atomic.
///
/// ```
/// use reflex_duel::peer::capture::EdgeCapture;
/// use web_time::{Duration, Instant};
///
/// let epoch = Instant::now();
/// let capture = EdgeCapture::new(epoch);
/// assert!(!capture.on_press(epoch + Duration::from_millis(5))); // not armed
///
/// capture.arm();
/// assert!(capture.on_press(epoch + Duration::from_millis(120)));
/// assert!(!capture.on_press(epoch + Duration::from_millis(130))); // first edge wins
/// assert_eq!(capture.take(), Some(epoch + Duration::from_millis(120)));
/// assert_eq!(capture.take(), None);
/// ```
#[derive(Debug)]
pub struct EdgeCapture {
    epoch: Instant,
    armed: AtomicBool,
    captured: AtomicBool,
    at_micros: AtomicU64,
}

impl EdgeCapture {
    /// A disarmed capture measuring from `epoch`.
    #[must_use]
    pub fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            armed: AtomicBool::new(false),
            captured: AtomicBool::new(false),
            at_micros: AtomicU64::new(0),
        }
    }

    /// Accepts the next edge.
    pub fn arm(&self) {
        self.captured.store(false, Ordering::Release);
        self.armed.store(true, Ordering::Release);
    }

    /// Ignores edges and forgets any captured one.
    pub fn clear(&self) {
        self.armed.store(false, Ordering::Release);
        self.captured.store(false, Ordering::Release);
    }

    /// Whether an edge would currently be recorded.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Interrupt handler body. Records `at` if armed and nothing was captured
    /// yet; returns whether it did.
    pub fn on_press(&self, at: Instant) -> bool {
        if !self.armed.swap(false, Ordering::AcqRel) {
            return false;
        }
        let micros = at.saturating_duration_since(self.epoch).as_micros();
        self.at_micros
            .store(u64::try_from(micros).unwrap_or(u64::MAX), Ordering::Relaxed);
        self.captured.store(true, Ordering::Release);
        true
    }

    /// Takes the captured edge, if one arrived.
    pub fn take(&self) -> Option<Instant> {
        if !self.captured.swap(false, Ordering::AcqRel) {
            return None;
        }
        let micros = self.at_micros.load(Ordering::Relaxed);
        Some(self.epoch + Duration::from_micros(micros))
    }
}

/// Stable-level filter for a bouncy button.
///
/// A level change only counts once the raw input has read the same for the
/// whole window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debouncer {
    window: Duration,
    raw: bool,
    changed_at: Option<Instant>,
    stable: bool,
}

impl Debouncer {
    /// A released button with the given window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            raw: false,
            changed_at: None,
            stable: false,
        }
    }

    /// Feeds the raw level (`true` = pressed) and returns the debounced one.
    pub fn update(&mut self, pressed: bool, now: Instant) -> bool {
        if pressed != self.raw || self.changed_at.is_none() {
            self.raw = pressed;
            self.changed_at = Some(now);
        }
        let held = self
            .changed_at
            .map_or(Duration::ZERO, |since| now.saturating_duration_since(since));
        if held >= self.window {
            self.stable = self.raw;
        }
        self.stable
    }

    /// The debounced level.
    #[must_use]
    pub const fn is_pressed(&self) -> bool {
        self.stable
    }

    /// Forgets history; the button reads released.
    pub fn reset(&mut self) {
        *self = Self::new(self.window);
    }
}

#[cfg(all(test, not(loom)))]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn clear_drops_a_pending_edge() {
        let epoch = Instant::now();
        let capture = EdgeCapture::new(epoch);
        capture.arm();
        capture.on_press(epoch + ms(3));
        capture.clear();
        assert_eq!(capture.take(), None);
        assert!(!capture.is_armed());
    }

    #[test]
    fn rearming_discards_the_previous_edge() {
        let epoch = Instant::now();
        let capture = EdgeCapture::new(epoch);
        capture.arm();
        capture.on_press(epoch + ms(3));
        capture.arm();
        assert_eq!(capture.take(), None);
        capture.on_press(epoch + ms(9));
        assert_eq!(capture.take(), Some(epoch + ms(9)));
    }

    #[test]
    fn microsecond_resolution_survives() {
        let epoch = Instant::now();
        let capture = EdgeCapture::new(epoch);
        capture.arm();
        let at = epoch + Duration::from_micros(120_437);
        capture.on_press(at);
        assert_eq!(capture.take(), Some(at));
    }

    #[test]
    fn edge_from_another_thread_is_seen() {
        let epoch = Instant::now();
        let capture = Arc::new(EdgeCapture::new(epoch));
        capture.arm();
        let isr = Arc::clone(&capture);
        std::thread::spawn(move || isr.on_press(epoch + ms(42)))
            .join()
            .unwrap();
        assert_eq!(capture.take(), Some(epoch + ms(42)));
    }

    #[test]
    fn debouncer_needs_a_stable_window() {
        let t0 = Instant::now();
        let mut button = Debouncer::new(ms(50));
        assert!(!button.update(true, t0));
        assert!(!button.update(false, t0 + ms(10))); // bounce
        assert!(!button.update(true, t0 + ms(20)));
        assert!(!button.update(true, t0 + ms(69)));
        assert!(button.update(true, t0 + ms(70)));
        assert!(button.update(false, t0 + ms(80)));
        assert!(!button.update(false, t0 + ms(130)));
    }
}
