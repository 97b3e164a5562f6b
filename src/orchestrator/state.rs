//! Coordinator state machine.
//!
//! # State Machine Diagram
//!
//! ```text
//!                 idle dwell / skip-wait
//!   ┌──────┐ ──────────────────────────► ┌─────────┐
//!   │ Idle │                             │ Joining │◄─┐ fewer than min_players
//!   └──────┘ ◄───────┐                   └────┬────┘──┘ after every prompt
//!       ▲            │                        │ enough players + settle
//!       │ final dwell│                        ▼
//!   ┌───┴───┐        │                   ┌───────────┐ reaction ┌──────────────┐
//!   │ Final │        └───────────────────│ Countdown │─────────►│ ReactionWait │
//!   └───────┘ ◄──────┐                   └─────┬─────┘          └──────┬───────┘
//!                    │ last round             │ shake: 3, 2, 1, go     │ go
//!                    │ (no tie)               ▼                        ▼
//!                ┌───┴─────┐  timeout/done ┌─────────────┐      ┌────────────┐
//!                │ Results │◄──────────────│ ShakeActive │      │ Collecting │
//!                └───┬─────┘◄──────────────┴─────────────┘──────┴────────────┘
//!                    │         all reported / grace expired
//!                    │ more rounds, or tie-break
//!                    └────────────────────────────► Countdown
//! ```
//!
//! Reaction rounds have no visible countdown: the go lands after a random
//! delay and Collecting is where players are timed.
//!
//! | From         | To           | Trigger                                         |
//! |--------------|--------------|-------------------------------------------------|
//! | Idle         | Joining      | `idle_dwell` elapsed, or skip-wait              |
//! | Joining      | Countdown    | `join_settle` after join completed              |
//! | Countdown    | ReactionWait | reaction round drawn                            |
//! | Countdown    | ShakeActive  | go after the 3, 2, 1 ticks                      |
//! | ReactionWait | Collecting   | announce delay + drawn delay elapsed (go)       |
//! | Collecting   | Results      | every active slot reported, or grace expired    |
//! | ShakeActive  | Results      | every active slot reported, or `shake_timeout`  |
//! | Results      | Countdown    | `results_dwell`, more rounds or tie-break       |
//! | Results      | Final        | `results_dwell`, game decided                   |
//! | Final        | Idle         | `final_dwell` elapsed, or skip-wait             |

use serde::{Deserialize, Serialize};
use web_time::{Duration, Instant};

use crate::Slot;

/// Where the coordinator is in a game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GamePhase {
    /// Attract loop between games.
    #[default]
    Idle,
    /// Offering slots to controllers.
    Joining,
    /// Round announced; shake rounds count down here.
    Countdown,
    /// Reaction round waiting for its random go.
    ReactionWait,
    /// Shake round running.
    ShakeActive,
    /// Reaction round running: waiting for every result.
    Collecting,
    /// Two-phase reveal of times, then winner and scores.
    Results,
    /// Game winner on show.
    Final,
}

impl std::fmt::Display for GamePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Joining => "joining",
            Self::Countdown => "countdown",
            Self::ReactionWait => "reaction-wait",
            Self::ShakeActive => "shake-active",
            Self::Collecting => "collecting",
            Self::Results => "results",
            Self::Final => "final",
        };
        f.write_str(name)
    }
}

/// The live phase together with its local bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Joining {
        prompt: Slot,
        prompt_started: Instant,
        /// Set once join has completed; the game starts `join_settle` later.
        completed_at: Option<Instant>,
    },
    Countdown {
        announce: Duration,
        /// Next number to show; 0 means the go is next.
        next: u8,
        last_tick: Option<Instant>,
    },
    ReactionWait {
        announce: Duration,
        delay: Duration,
    },
    ShakeActive,
    Collecting {
        grace_started: Option<Instant>,
    },
    Results {
        revealed: bool,
    },
    Final,
}

impl Phase {
    pub(crate) const fn public(&self) -> GamePhase {
        match self {
            Self::Idle => GamePhase::Idle,
            Self::Joining { .. } => GamePhase::Joining,
            Self::Countdown { .. } => GamePhase::Countdown,
            Self::ReactionWait { .. } => GamePhase::ReactionWait,
            Self::ShakeActive => GamePhase::ShakeActive,
            Self::Collecting { .. } => GamePhase::Collecting,
            Self::Results { .. } => GamePhase::Results,
            Self::Final => GamePhase::Final,
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

    #[test]
    fn phase_maps_to_public_phase() {
        let now = Instant::now();
        assert_eq!(Phase::Idle.public(), GamePhase::Idle);
        assert_eq!(
            Phase::Joining {
                prompt: Slot::ALL[0],
                prompt_started: now,
                completed_at: None
            }
            .public(),
            GamePhase::Joining
        );
        assert_eq!(
            Phase::Collecting {
                grace_started: Some(now)
            }
            .public(),
            GamePhase::Collecting
        );
        assert_eq!(Phase::Results { revealed: true }.public(), GamePhase::Results);
    }

    #[test]
    fn display_names() {
        assert_eq!(GamePhase::ReactionWait.to_string(), "reaction-wait");
        assert_eq!(GamePhase::default(), GamePhase::Idle);
    }
}
