//! The one place coordinator state crosses into another execution context.
//!
//! A renderer (LED animation, audio sequencing, a screen) runs on its own
//! schedule, possibly on another core. It shares exactly one object with the
//! coordinator: a [`StateBoundary`], a mutex-guarded [`RenderSnapshot`].
//!
//! Both sides only ever hold the lock for a short, bounded copy, and both
//! acquire it with a timeout. A failed acquisition is not an error: the
//! coordinator keeps its update and retries on its next tick, the renderer
//! draws the frame it already has.
//!
//! ```
//! use reflex_duel::{GamePhase, StateBoundary};
//! use web_time::Duration;
//!
//! let boundary = StateBoundary::new();
//! let renderer = boundary.clone();
//!
//! assert!(boundary.try_apply(Duration::from_millis(2), |snapshot| {
//!     snapshot.phase = GamePhase::Joining;
//! }));
//! let seen = renderer.snapshot(Duration::from_millis(2)).unwrap();
//! assert_eq!(seen.phase, GamePhase::Joining);
//! ```

use std::sync::Arc as StdArc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use web_time::Duration;

use crate::orchestrator::outputs::{LedScene, UiCommand, ZoneOverride, ZONE_COUNT};
use crate::orchestrator::roster::PeerSlot;
use crate::orchestrator::selection::RoundConfig;
use crate::orchestrator::GamePhase;
use crate::sync::{Arc, AtomicU64, Mutex, Ordering};
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{report_violation_to, Slot, MAX_SLOTS};

/// Everything a renderer may know about the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSnapshot {
    /// Bumped on every successful apply.
    pub revision: u64,
    /// Current phase.
    pub phase: GamePhase,
    /// Round number, 1-based; 0 before the first round.
    pub round: u8,
    /// Regular rounds in the game.
    pub rounds: u8,
    /// Mode and parameter of the current round.
    pub round_config: Option<RoundConfig>,
    /// Background LED animation.
    pub scene: LedScene,
    /// Per-zone colour overrides.
    pub zones: [Option<ZoneOverride>; ZONE_COUNT],
    /// Countdown number on show.
    pub countdown: Option<u8>,
    /// The countdown flash is lit.
    pub flash: bool,
    /// Slot currently offered during joining.
    pub prompt_slot: Option<Slot>,
    /// Player slots.
    pub slots: [PeerSlot; MAX_SLOTS],
    /// Winner of the last revealed round.
    pub round_winner: Option<Slot>,
    /// Winner of the game.
    pub final_winner: Option<Slot>,
    /// Sudden-death pair.
    pub tie_break: Option<(Slot, Slot)>,
    /// Commands not yet taken by the renderer, oldest first.
    pub commands: Vec<UiCommand>,
}

impl Default for RenderSnapshot {
    fn default() -> Self {
        Self {
            revision: 0,
            phase: GamePhase::Idle,
            round: 0,
            rounds: 0,
            round_config: None,
            scene: LedScene::IdleRainbow,
            zones: [None; ZONE_COUNT],
            countdown: None,
            flash: false,
            prompt_slot: None,
            slots: [PeerSlot::default(); MAX_SLOTS],
            round_winner: None,
            final_winner: None,
            tie_break: None,
            commands: Vec::new(),
        }
    }
}

/// Shared handle on the render snapshot. Clones share the same cell.
#[derive(Clone)]
pub struct StateBoundary {
    cell: Arc<Mutex<RenderSnapshot>>,
    contended: Arc<AtomicU64>,
    violation_observer: Option<StdArc<dyn ViolationObserver>>,
}

impl StateBoundary {
    /// An empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Mutex::new(RenderSnapshot::default())),
            contended: Arc::new(AtomicU64::new(0)),
            violation_observer: None,
        }
    }

    /// Routes contention reports to `observer`.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: StdArc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Runs `apply` on the snapshot if the lock can be had within `timeout`,
    /// then bumps the revision.
    ///
    /// Returns `false` when the lock stayed busy; `apply` was not run and the
    /// caller should try again next tick.
    pub fn try_apply<F>(&self, timeout: Duration, apply: F) -> bool
    where
        F: FnOnce(&mut RenderSnapshot),
    {
        match self.cell.try_lock_for(timeout) {
            Some(mut guard) => {
                apply(&mut guard);
                guard.revision = guard.revision.wrapping_add(1);
                true
            },
            None => {
                self.note_contention("apply");
                false
            },
        }
    }

    /// Moves the pending commands out, oldest first. `None` if the lock stayed
    /// busy.
    #[must_use]
    pub fn take_commands(&self, timeout: Duration) -> Option<Vec<UiCommand>> {
        match self.cell.try_lock_for(timeout) {
            Some(mut guard) => Some(std::mem::take(&mut guard.commands)),
            None => {
                self.note_contention("take_commands");
                None
            },
        }
    }

    /// A copy of the snapshot. `None` if the lock stayed busy.
    #[must_use]
    pub fn snapshot(&self, timeout: Duration) -> Option<RenderSnapshot> {
        match self.cell.try_lock_for(timeout) {
            Some(guard) => Some(guard.clone()),
            None => {
                self.note_contention("snapshot");
                None
            },
        }
    }

    /// Acquisitions that timed out, from either side.
    #[must_use]
    pub fn contention_count(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }

    fn note_contention(&self, operation: &str) {
        let count = self.contended.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(operation, count, "state boundary busy");
        report_violation_to!(
            &self.violation_observer,
            ViolationSeverity::Warning,
            ViolationKind::Boundary,
            "{} skipped: snapshot lock busy ({} so far)",
            operation,
            count
        );
    }
}

impl Default for StateBoundary {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateBoundary")
            .field("contended", &self.contention_count())
            .finish_non_exhaustive()
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
    use crate::orchestrator::outputs::SoundCue;
    use crate::telemetry::CollectingObserver;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_millis(5);

    #[test]
    fn apply_bumps_revision() {
        let boundary = StateBoundary::new();
        assert!(boundary.try_apply(WAIT, |snapshot| snapshot.round = 2));
        let snapshot = boundary.snapshot(WAIT).unwrap();
        assert_eq!(snapshot.round, 2);
        assert_eq!(snapshot.revision, 1);
    }

    #[test]
    fn commands_are_taken_once() {
        let boundary = StateBoundary::new();
        boundary.try_apply(WAIT, |snapshot| {
            snapshot.commands.push(UiCommand::PlaySound(SoundCue::Beep));
            snapshot.commands.push(UiCommand::StopSound);
        });
        assert_eq!(
            boundary.take_commands(WAIT).unwrap(),
            vec![UiCommand::PlaySound(SoundCue::Beep), UiCommand::StopSound]
        );
        assert!(boundary.take_commands(WAIT).unwrap().is_empty());
    }

    #[test]
    fn busy_lock_skips_and_counts() {
        let observer = StdArc::new(CollectingObserver::new());
        let boundary = StateBoundary::new().with_violation_observer(observer.clone());
        let renderer = boundary.clone();
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = std::thread::spawn(move || {
            renderer.try_apply(Duration::from_secs(1), |_| {
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        });
        locked_rx.recv().unwrap();

        let mut ran = false;
        assert!(!boundary.try_apply(Duration::from_millis(1), |_| ran = true));
        assert!(!ran);
        assert!(boundary.snapshot(Duration::from_millis(1)).is_none());
        assert_eq!(boundary.contention_count(), 2);
        crate::assert_violation!(observer, ViolationKind::Boundary);

        release_tx.send(()).unwrap();
        assert!(holder.join().unwrap());
        assert!(boundary.try_apply(WAIT, |_| {}));
    }
}
