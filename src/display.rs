//! The status display.
//!
//! A [`DisplayUnit`] turns the coordinator's display commands into a
//! [`DisplayModel`] that a screen can draw. It acknowledges what the
//! coordinator retries and filters the retransmissions that follow a lost
//! acknowledgement.
//!
//! Per-slot times and score updates are sent best effort in bursts, so they
//! are neither acknowledged nor filtered: two slots may well report the same
//! time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::network::messages::{DisplayCommand, Message, MessageBody};
use crate::network::transport::{Endpoint, Transport};
use crate::orchestrator::outputs::ZoneColor;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{report_violation_to, DeviceId, ResultTime, Slot, MAX_SLOTS};

/// Top-level screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Screen {
    /// Attract screen.
    #[default]
    Idle,
    /// Join prompts and ready slots.
    Prompt,
    /// Countdown number.
    Countdown,
    /// The go.
    Go,
    /// Reaction round announced or running.
    Reaction,
    /// Shake round announced or running.
    Shake,
    /// Round winner with times and scores.
    RoundWinner,
    /// Game winner.
    FinalWinner,
}

/// A slot with a controller in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadySlot {
    /// The controller holding the slot.
    pub controller: DeviceId,
    /// Border colour of the slot's panel.
    pub color: ZoneColor,
}

/// Everything the display shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayModel {
    /// Current screen.
    pub screen: Screen,
    /// Countdown number, if one is up.
    pub countdown: Option<u8>,
    /// Slot blinking for a join.
    pub prompt_slot: Option<Slot>,
    /// Bound slots.
    pub ready: [Option<ReadySlot>; MAX_SLOTS],
    /// Times of the current round.
    pub times: [Option<ResultTime>; MAX_SLOTS],
    /// Scores, once revealed.
    pub scores: [Option<u8>; MAX_SLOTS],
    /// The score row is visible.
    pub show_scores: bool,
    /// Round or game winner on show.
    pub winner: Option<Slot>,
    /// Sudden-death banner; cleared by the next command.
    pub tie_break: Option<(Slot, Slot)>,
    /// Target of the current shake round.
    pub shake_target: Option<u8>,
}

impl DisplayModel {
    /// Applies one command.
    pub fn apply(&mut self, command: DisplayCommand) {
        if !matches!(command, DisplayCommand::TieBreak { .. }) {
            self.tie_break = None;
        }
        match command {
            DisplayCommand::Idle => *self = Self::default(),
            DisplayCommand::PromptJoin => self.screen = Screen::Prompt,
            DisplayCommand::SlotReady { slot, controller } => {
                self.ready[slot.index()] = Some(ReadySlot {
                    controller,
                    color: ZoneColor::identity(controller),
                });
                if self.prompt_slot == Some(slot) {
                    self.prompt_slot = None;
                }
                if self.screen == Screen::Idle {
                    self.screen = Screen::Prompt;
                }
            },
            DisplayCommand::PromptSlot { slot } => {
                self.prompt_slot = Some(slot);
                self.screen = Screen::Prompt;
            },
            DisplayCommand::Countdown { n: 0 } => self.countdown = None,
            DisplayCommand::Countdown { n } => {
                self.screen = Screen::Countdown;
                self.countdown = Some(n);
            },
            DisplayCommand::Go => {
                self.screen = Screen::Go;
                self.countdown = None;
            },
            DisplayCommand::ReactionMode => self.new_round(Screen::Reaction, None),
            DisplayCommand::ShakeMode { target } => self.new_round(Screen::Shake, Some(target)),
            DisplayCommand::SlotTime { slot, time } => self.times[slot.index()] = Some(time),
            DisplayCommand::RoundWinner(winner) => {
                self.screen = Screen::RoundWinner;
                self.winner = winner;
            },
            DisplayCommand::Score { slot, score } => {
                self.scores[slot.index()] = Some(score);
                self.show_scores = true;
            },
            DisplayCommand::FinalWinner(winner) => {
                self.screen = Screen::FinalWinner;
                self.winner = winner;
            },
            DisplayCommand::TieBreak { first, second } => {
                self.tie_break = Some((first, second));
            },
        }
    }

    fn new_round(&mut self, screen: Screen, shake_target: Option<u8>) {
        self.screen = screen;
        self.shake_target = shake_target;
        self.prompt_slot = None;
        self.winner = None;
        self.show_scores = false;
        self.times = [None; MAX_SLOTS];
        self.scores = [None; MAX_SLOTS];
    }
}

/// Counters kept by a [`DisplayUnit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayStats {
    /// Commands applied to the model.
    pub applied: u64,
    /// Retransmissions dropped by the repeat filter.
    pub repeats_dropped: u64,
    /// Acknowledgements sent.
    pub acks_sent: u64,
    /// Frames that were not display commands from the coordinator.
    pub ignored: u64,
}

/// Display-side endpoint of the game.
///
/// ```
/// use reflex_duel::network::loopback::LoopbackBus;
/// use reflex_duel::network::messages::DisplayCommand;
/// use reflex_duel::display::Screen;
/// use reflex_duel::{DeviceId, DisplayUnit, Endpoint, Message, MessageBody};
///
/// let bus = LoopbackBus::new();
/// let mut host = Endpoint::new(DeviceId::HOST, bus.port(DeviceId::HOST));
/// let mut display = DisplayUnit::new(bus.port(DeviceId::DISPLAY));
///
/// let go = MessageBody::Display(DisplayCommand::Go);
/// host.send(&Message::new(DeviceId::DISPLAY, DeviceId::HOST, go));
/// display.poll();
/// assert_eq!(display.model().screen, Screen::Go);
/// ```
pub struct DisplayUnit<T: Transport> {
    endpoint: Endpoint<T>,
    model: DisplayModel,
    /// Code and payload of the last reliable command applied.
    last: Option<(u8, u16)>,
    revision: u64,
    stats: DisplayStats,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl<T: Transport> DisplayUnit<T> {
    /// Creates a display at [`DeviceId::DISPLAY`] showing the idle screen.
    pub fn new(transport: T) -> Self {
        Self {
            endpoint: Endpoint::new(DeviceId::DISPLAY, transport),
            model: DisplayModel::default(),
            last: None,
            revision: 0,
            stats: DisplayStats::default(),
            violation_observer: None,
        }
    }

    /// Routes violations to `observer` instead of the tracing default.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.endpoint = self.endpoint.with_violation_observer(observer.clone());
        self.violation_observer = Some(observer);
        self
    }

    /// Drains the link and applies every command. Returns how many changed
    /// the model.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        for message in self.endpoint.poll_messages() {
            if self.handle(message) {
                applied += 1;
            }
        }
        applied
    }

    /// Asks the coordinator to cut the current wait short.
    pub fn request_skip(&mut self) {
        debug!("skip requested");
        self.endpoint.send(&Message::new(
            DeviceId::HOST,
            DeviceId::DISPLAY,
            MessageBody::SkipWait,
        ));
    }

    /// What the screen shows.
    #[must_use]
    pub fn model(&self) -> &DisplayModel {
        &self.model
    }

    /// Bumped on every applied command.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> DisplayStats {
        self.stats
    }

    /// The link endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint<T> {
        &self.endpoint
    }

    /// The link endpoint, mutably.
    pub fn endpoint_mut(&mut self) -> &mut Endpoint<T> {
        &mut self.endpoint
    }

    fn handle(&mut self, message: Message) -> bool {
        let MessageBody::Display(command) = message.body else {
            self.stats.ignored += 1;
            trace!(src = %message.src, body = ?message.body, "not a display command");
            return false;
        };
        if message.src != DeviceId::HOST {
            self.stats.ignored += 1;
            report_violation_to!(
                &self.violation_observer,
                device = message.src,
                ViolationSeverity::Warning,
                ViolationKind::Protocol,
                "display command {:?} from {}",
                command,
                message.src
            );
            return false;
        }
        if command.is_reliable() {
            self.stats.acks_sent += 1;
            self.endpoint.send(&Message::new(
                DeviceId::HOST,
                DeviceId::DISPLAY,
                MessageBody::Ack {
                    acked: command.code(),
                },
            ));
            let key = (command.code(), message.body.data());
            if self.last == Some(key) {
                self.stats.repeats_dropped += 1;
                trace!(?command, "repeat dropped");
                return false;
            }
            self.last = Some(key);
        }
        trace!(?command, "display");
        self.model.apply(command);
        self.stats.applied += 1;
        self.revision = self.revision.wrapping_add(1);
        true
    }
}

impl<T: Transport> std::fmt::Debug for DisplayUnit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayUnit")
            .field("screen", &self.model.screen)
            .field("revision", &self.revision)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
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
    use crate::network::loopback::{LoopbackBus, LoopbackPort};
    use crate::network::messages::codes;
    use crate::telemetry::CollectingObserver;

    fn slot(n: u8) -> Slot {
        Slot::from_number(n).unwrap()
    }

    struct Wall {
        display: DisplayUnit<LoopbackPort>,
        host: Endpoint<LoopbackPort>,
        observer: Arc<CollectingObserver>,
    }

    impl Wall {
        fn new() -> Self {
            let bus = LoopbackBus::new();
            let observer = Arc::new(CollectingObserver::new());
            Self {
                display: DisplayUnit::new(bus.port(DeviceId::DISPLAY))
                    .with_violation_observer(observer.clone()),
                host: Endpoint::new(DeviceId::HOST, bus.port(DeviceId::HOST)),
                observer,
            }
        }

        fn show(&mut self, commands: &[DisplayCommand]) -> usize {
            for command in commands {
                self.host.send(&Message::new(
                    DeviceId::DISPLAY,
                    DeviceId::HOST,
                    MessageBody::Display(*command),
                ));
            }
            self.display.poll()
        }

        fn acks(&mut self) -> Vec<u8> {
            self.host
                .poll_messages()
                .into_iter()
                .filter_map(|message| match message.body {
                    MessageBody::Ack { acked } => Some(acked),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn times_and_scores_are_not_acked() {
        let mut wall = Wall::new();
        wall.show(&[
            DisplayCommand::RoundWinner(Some(slot(2))),
            DisplayCommand::SlotTime {
                slot: slot(1),
                time: ResultTime::Millis(140),
            },
            DisplayCommand::Score {
                slot: slot(2),
                score: 1,
            },
        ]);
        assert_eq!(wall.acks(), vec![codes::DISP_ROUND_WINNER]);
    }

    #[test]
    fn retransmission_is_acked_but_not_reapplied() {
        let mut wall = Wall::new();
        let prompt = DisplayCommand::PromptSlot { slot: slot(3) };
        assert_eq!(wall.show(&[prompt, prompt]), 1);
        assert_eq!(
            wall.acks(),
            vec![codes::DISP_PROMPT_SLOT, codes::DISP_PROMPT_SLOT]
        );
        assert_eq!(wall.display.stats().repeats_dropped, 1);
        assert_eq!(wall.display.revision(), 1);
    }

    #[test]
    fn equal_times_for_two_slots_both_land() {
        let mut wall = Wall::new();
        let time = ResultTime::Millis(200);
        wall.show(&[
            DisplayCommand::SlotTime { slot: slot(1), time },
            DisplayCommand::SlotTime { slot: slot(1), time },
        ]);
        assert_eq!(wall.display.stats().applied, 2);
        assert_eq!(wall.display.model().times[0], Some(time));
    }

    #[test]
    fn join_sequence() {
        let mut wall = Wall::new();
        wall.show(&[
            DisplayCommand::Idle,
            DisplayCommand::PromptJoin,
            DisplayCommand::PromptSlot { slot: slot(1) },
            DisplayCommand::SlotReady {
                slot: slot(1),
                controller: DeviceId::STICK3,
            },
        ]);
        let model = wall.display.model();
        assert_eq!(model.screen, Screen::Prompt);
        assert_eq!(model.prompt_slot, None);
        assert_eq!(
            model.ready[0],
            Some(ReadySlot {
                controller: DeviceId::STICK3,
                color: ZoneColor::Red,
            })
        );
    }

    #[test]
    fn round_announce_clears_previous_round() {
        let mut model = DisplayModel::default();
        model.apply(DisplayCommand::SlotTime {
            slot: slot(2),
            time: ResultTime::Penalty,
        });
        model.apply(DisplayCommand::Score {
            slot: slot(2),
            score: 3,
        });
        model.apply(DisplayCommand::RoundWinner(Some(slot(2))));
        model.apply(DisplayCommand::ShakeMode { target: 15 });
        assert_eq!(model.screen, Screen::Shake);
        assert_eq!(model.shake_target, Some(15));
        assert_eq!(model.times, [None; MAX_SLOTS]);
        assert!(!model.show_scores);
        assert_eq!(model.winner, None);
    }

    #[test]
    fn countdown_then_go() {
        let mut model = DisplayModel::default();
        model.apply(DisplayCommand::Countdown { n: 3 });
        assert_eq!(
            (model.screen, model.countdown),
            (Screen::Countdown, Some(3))
        );
        model.apply(DisplayCommand::Countdown { n: 0 });
        assert_eq!(model.countdown, None);
        model.apply(DisplayCommand::Go);
        assert_eq!(model.screen, Screen::Go);
    }

    #[test]
    fn tie_break_banner_lasts_one_command() {
        let mut model = DisplayModel::default();
        model.apply(DisplayCommand::TieBreak {
            first: slot(1),
            second: slot(4),
        });
        assert_eq!(model.tie_break, Some((slot(1), slot(4))));
        model.apply(DisplayCommand::ReactionMode);
        assert_eq!(model.tie_break, None);
    }

    #[test]
    fn idle_resets_everything() {
        let mut model = DisplayModel::default();
        model.apply(DisplayCommand::SlotReady {
            slot: slot(2),
            controller: DeviceId::STICK1,
        });
        model.apply(DisplayCommand::FinalWinner(Some(slot(2))));
        model.apply(DisplayCommand::Idle);
        assert_eq!(model, DisplayModel::default());
    }

    #[test]
    fn skip_request_reaches_the_coordinator() {
        let mut wall = Wall::new();
        wall.display.request_skip();
        let inbound = wall.host.poll_messages();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].body, MessageBody::SkipWait);
        assert_eq!(inbound[0].src, DeviceId::DISPLAY);
    }

    #[test]
    fn commands_from_controllers_are_rejected() {
        let bus = LoopbackBus::new();
        let observer = Arc::new(CollectingObserver::new());
        let mut display = DisplayUnit::new(bus.port(DeviceId::DISPLAY))
            .with_violation_observer(observer.clone());
        let mut rogue = Endpoint::new(DeviceId::STICK2, bus.port(DeviceId::STICK2));
        rogue.send(&Message::new(
            DeviceId::DISPLAY,
            DeviceId::STICK2,
            MessageBody::Display(DisplayCommand::Go),
        ));
        assert_eq!(display.poll(), 0);
        assert_eq!(display.model().screen, Screen::Idle);
        crate::assert_violation!(observer, ViolationKind::Protocol);
        assert_eq!(display.stats().acks_sent, 0);
    }

    #[test]
    fn non_display_traffic_is_counted() {
        let mut wall = Wall::new();
        wall.host.send(&Message::new(
            DeviceId::DISPLAY,
            DeviceId::HOST,
            MessageBody::Go,
        ));
        assert_eq!(wall.display.poll(), 0);
        assert_eq!(wall.display.stats().ignored, 1);
        crate::assert_no_violations!(wall.observer);
    }
}
