//! The coordinator.
//!
//! An [`Orchestrator`] owns the link to every controller and the display, the
//! player roster and the round drawer, and runs one game after another. It is
//! driven entirely by [`Orchestrator::poll`] with caller-supplied time:
//!
//! 1. drain the transport and dispatch every inbound message,
//! 2. run the retry clock of reliable delivery,
//! 3. run the current phase's tick,
//! 4. publish the render snapshot and queued [`UiCommand`]s through the
//!    [`StateBoundary`], if one is attached.
//!
//! Nothing in this loop blocks and nothing fails: stale, duplicate or
//! misaddressed frames are reported through telemetry and ignored.
//!
//! # Example
//!
//! ```
//! use reflex_duel::network::loopback::LoopbackBus;
//! use reflex_duel::rng::{Pcg32, SeedableRng};
//! use reflex_duel::{DeviceId, GameConfig, GamePhase, Orchestrator, TimingConfig};
//! use web_time::{Duration, Instant};
//!
//! let bus = LoopbackBus::new();
//! let config = GameConfig {
//!     timing: TimingConfig::quick(),
//!     ..GameConfig::default()
//! };
//! let mut coordinator =
//!     Orchestrator::new(config, bus.port(DeviceId::HOST), Pcg32::seed_from_u64(7)).unwrap();
//!
//! let start = Instant::now();
//! coordinator.poll(start);
//! assert_eq!(coordinator.phase(), GamePhase::Idle);
//! coordinator.poll(start + Duration::from_millis(300));
//! assert_eq!(coordinator.phase(), GamePhase::Joining);
//! ```

pub mod outputs;
/// Player slots, their controllers and scores.
pub mod roster;
pub mod selection;
mod state;

pub use state::GamePhase;

use std::collections::vec_deque::Drain;
use std::collections::VecDeque;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, info, trace, warn};
use web_time::{Duration, Instant};

use crate::boundary::{RenderSnapshot, StateBoundary};
use crate::config::GameConfig;
use crate::network::delivery::{DeliveryStats, ReliableSender};
use crate::network::messages::{DisplayCommand, FirmwareVersion, GameMode, Message, MessageBody};
use crate::network::transport::{Endpoint, Transport};
use crate::rng::Pcg32;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{report_violation_to, DeviceId, DuelError, ResultTime, Slot, MAX_SLOTS};

use outputs::{LedScene, SoundCue, UiCommand, ZoneColor, ZoneOverride, ZONE_COUNT};
use roster::Roster;
use selection::{RoundConfig, RoundSelector};
use state::Phase;

/// Events kept before the oldest are dropped.
const MAX_EVENT_QUEUE_SIZE: usize = 100;

/// Commands held, in the snapshot or unpublished, for a renderer that is not
/// taking them.
const MAX_SNAPSHOT_COMMANDS: usize = 256;

/// Default bound on acquiring the state boundary from the game loop.
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(2);

/// Game milestones, drained with [`Orchestrator::events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// A controller claimed a slot.
    PlayerJoined {
        /// The claimed slot.
        slot: Slot,
        /// The controller now bound to it.
        controller: DeviceId,
    },
    /// A round was drawn and announced.
    RoundStarted {
        /// 1-based round number.
        round: u8,
        /// Mode and parameter.
        config: RoundConfig,
    },
    /// The go event was sent.
    Go {
        /// Round it belongs to.
        round: u8,
    },
    /// A result was accepted or a slot was penalized.
    ResultRecorded {
        /// The slot.
        slot: Slot,
        /// Its result.
        result: ResultTime,
    },
    /// The round winner was revealed.
    RoundFinished {
        /// Round number.
        round: u8,
        /// Winner, `None` when every active slot was penalized.
        winner: Option<Slot>,
    },
    /// Sudden death between two slots tied on the top score.
    TieBreakStarted {
        /// Lower slot of the pair.
        first: Slot,
        /// Higher slot of the pair.
        second: Slot,
    },
    /// The game ended.
    GameOver {
        /// Winner, `None` when nobody scored.
        winner: Option<Slot>,
    },
}

/// First-time flags for the longer mode introductions.
#[derive(Debug, Clone, Copy, Default)]
struct Introduced {
    reaction: bool,
    shake: bool,
}

impl Introduced {
    /// Returns `true` the first time `mode` is asked for.
    fn first_time(&mut self, mode: GameMode) -> bool {
        let seen = match mode {
            GameMode::Reaction => &mut self.reaction,
            GameMode::Shake => &mut self.shake,
        };
        !std::mem::replace(seen, true)
    }
}

/// What the renderer should currently show.
#[derive(Debug, Clone, Copy)]
struct View {
    scene: LedScene,
    zones: [Option<ZoneOverride>; ZONE_COUNT],
    countdown: Option<u8>,
    flash_until: Option<Instant>,
    prompt_slot: Option<Slot>,
    round_winner: Option<Slot>,
    final_winner: Option<Slot>,
}

impl Default for View {
    fn default() -> Self {
        Self {
            scene: LedScene::IdleRainbow,
            zones: [None; ZONE_COUNT],
            countdown: None,
            flash_until: None,
            prompt_slot: None,
            round_winner: None,
            final_winner: None,
        }
    }
}

/// The coordinator's game loop.
///
/// Owns its transport and random generator, so a game is reproducible from a
/// seed and a sequence of `poll` times.
pub struct Orchestrator<T: Transport> {
    config: GameConfig,
    endpoint: Endpoint<T>,
    sender: ReliableSender,
    rng: Pcg32,
    selector: RoundSelector,
    roster: Roster,

    phase: Phase,
    /// Entry time of the current phase; `None` until the first poll.
    entered_at: Option<Instant>,
    round: u8,
    round_config: Option<RoundConfig>,
    introduced: Introduced,

    view: View,
    /// Render state changed since the last successful publish.
    dirty: bool,
    pending_ui: Vec<UiCommand>,
    events: VecDeque<GameEvent>,

    boundary: Option<StateBoundary>,
    publish_timeout: Duration,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl<T: Transport> Orchestrator<T> {
    /// Creates a coordinator talking through `transport`.
    ///
    /// The game starts in Idle on the first [`poll`](Self::poll).
    ///
    /// # Errors
    ///
    /// Returns the validation error of `config`.
    pub fn new(config: GameConfig, transport: T, rng: Pcg32) -> Result<Self, DuelError> {
        config.validate()?;
        Ok(Self {
            endpoint: Endpoint::new(DeviceId::HOST, transport),
            sender: ReliableSender::new(DeviceId::HOST, config.delivery),
            selector: RoundSelector::new(&config),
            rng,
            roster: Roster::new(),
            phase: Phase::Idle,
            entered_at: None,
            round: 0,
            round_config: None,
            introduced: Introduced::default(),
            view: View::default(),
            dirty: true,
            pending_ui: Vec::new(),
            events: VecDeque::new(),
            boundary: None,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            violation_observer: None,
            config,
        })
    }

    /// Routes violations of the coordinator, its endpoint and its sender to
    /// `observer`.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.endpoint = self.endpoint.with_violation_observer(observer.clone());
        self.sender = self.sender.with_violation_observer(observer.clone());
        self.violation_observer = Some(observer);
        self
    }

    /// Publishes every poll's render state and UI commands to `boundary`.
    ///
    /// Without a boundary, commands accumulate until
    /// [`take_ui_commands`](Self::take_ui_commands) is called.
    #[must_use]
    pub fn with_boundary(mut self, boundary: StateBoundary) -> Self {
        self.boundary = Some(boundary);
        self
    }

    /// Bound on acquiring the boundary lock from `poll`. Default: 2 ms.
    #[must_use]
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Runs one iteration of the game loop at `now`.
    pub fn poll(&mut self, now: Instant) {
        if self.entered_at.is_none() {
            self.enter_idle(now);
        }
        for message in self.endpoint.poll_messages() {
            self.handle_message(message, now);
        }
        self.sender.poll(self.endpoint.transport_mut(), now);
        self.tick(now);
        self.publish();
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> GamePhase {
        self.phase.public()
    }

    /// Slots, bindings and scores.
    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// 1-based number of the current round; 0 before the first.
    #[must_use]
    pub fn round(&self) -> u8 {
        self.round
    }

    /// Mode and parameter of the current round.
    #[must_use]
    pub fn round_config(&self) -> Option<RoundConfig> {
        self.round_config
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Counters of reliable delivery.
    #[must_use]
    pub fn delivery_stats(&self) -> DeliveryStats {
        self.sender.stats()
    }

    /// The reliable sender, for inspecting pending records.
    #[must_use]
    pub fn sender(&self) -> &ReliableSender {
        &self.sender
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

    /// Returns all events that happened since last queried.
    pub fn events(&mut self) -> Drain<'_, GameEvent> {
        self.events.drain(..)
    }

    /// UI commands not yet handed to a boundary, oldest first.
    pub fn take_ui_commands(&mut self) -> Vec<UiCommand> {
        std::mem::take(&mut self.pending_ui)
    }

    /// The current render state, without queued commands.
    #[must_use]
    pub fn render_snapshot(&self) -> RenderSnapshot {
        RenderSnapshot {
            revision: 0,
            phase: self.phase.public(),
            round: self.round,
            rounds: self.config.rounds,
            round_config: self.round_config,
            scene: self.view.scene,
            zones: self.view.zones,
            countdown: self.view.countdown,
            flash: self.view.flash_until.is_some(),
            prompt_slot: self.view.prompt_slot,
            slots: *self.roster.slots(),
            round_winner: self.view.round_winner,
            final_winner: self.view.final_winner,
            tie_break: self.roster.tie_break(),
            commands: Vec::new(),
        }
    }

    // ############
    // # INBOUND  #
    // ############

    fn handle_message(&mut self, message: Message, now: Instant) {
        let Message { src, body, .. } = message;
        match body {
            MessageBody::Ack { acked } => {
                self.sender.on_ack(src, acked);
            },
            MessageBody::SkipWait if src == DeviceId::DISPLAY => self.skip_wait(now),
            _ if !src.is_controller() => {
                report_violation_to!(
                    &self.violation_observer,
                    device = src,
                    ViolationSeverity::Warning,
                    ViolationKind::Protocol,
                    "unexpected {:?} from a device that is not a controller",
                    body
                );
            },
            MessageBody::JoinRequest { firmware } => self.on_join_request(src, firmware, now),
            MessageBody::ReactionResult(result) => {
                self.on_result(src, GameMode::Reaction, result);
            },
            MessageBody::ShakeResult(result) => self.on_result(src, GameMode::Shake, result),
            MessageBody::ShakeProgress { count, target } => {
                self.on_shake_progress(src, count, target);
            },
            MessageBody::Error { code } => {
                report_violation_to!(
                    &self.violation_observer,
                    device = src,
                    ViolationSeverity::Warning,
                    ViolationKind::Protocol,
                    "controller reported error 0x{:04X}",
                    code
                );
            },
            other => {
                report_violation_to!(
                    &self.violation_observer,
                    device = src,
                    ViolationSeverity::Warning,
                    ViolationKind::Protocol,
                    "unexpected {:?} addressed to the coordinator",
                    other
                );
            },
        }
    }

    fn skip_wait(&mut self, now: Instant) {
        match self.phase {
            Phase::Idle => {
                info!("skip requested, leaving idle");
                self.enter_joining(now);
            },
            Phase::Final => {
                info!("skip requested, leaving final");
                self.enter_idle(now);
            },
            _ => debug!(phase = %self.phase.public(), "skip-wait ignored"),
        }
    }

    fn on_join_request(&mut self, src: DeviceId, firmware: FirmwareVersion, now: Instant) {
        let Phase::Joining {
            prompt,
            completed_at: None,
            ..
        } = self.phase
        else {
            debug!(%src, %firmware, phase = %self.phase.public(), "join request ignored");
            return;
        };
        match self.roster.claim(prompt, src) {
            Ok(()) => {
                info!(%src, slot = prompt.number(), %firmware, "slot claimed");
                self.set_slot_color(prompt, ZoneColor::identity(src), false);
                self.send_display(
                    DisplayCommand::SlotReady {
                        slot: prompt,
                        controller: src,
                    },
                    now,
                );
                self.sender.send_best_effort(
                    self.endpoint.transport_mut(),
                    src,
                    MessageBody::JoinConfirm { slot: prompt },
                );
                self.push_event(GameEvent::PlayerJoined {
                    slot: prompt,
                    controller: src,
                });
                self.advance_prompt(prompt, now);
            },
            Err(reason) => {
                report_violation_to!(
                    &self.violation_observer,
                    device = src,
                    ViolationSeverity::Warning,
                    ViolationKind::Join,
                    "claim of {} refused: {:?}",
                    prompt,
                    reason
                );
            },
        }
    }

    fn on_result(&mut self, src: DeviceId, mode: GameMode, result: ResultTime) {
        let collecting = match self.phase {
            Phase::Collecting { .. } => GameMode::Reaction,
            Phase::ShakeActive => GameMode::Shake,
            _ => {
                report_violation_to!(
                    &self.violation_observer,
                    device = src,
                    ViolationSeverity::Warning,
                    ViolationKind::Protocol,
                    "{:?} result outside collection (phase {})",
                    mode,
                    self.phase.public()
                );
                return;
            },
        };
        if mode != collecting {
            report_violation_to!(
                &self.violation_observer,
                device = src,
                ViolationSeverity::Warning,
                ViolationKind::Protocol,
                "{:?} result during a {:?} round",
                mode,
                collecting
            );
            return;
        }
        let Some(slot) = self.roster.slot_of(src).filter(|slot| self.roster.is_active(*slot))
        else {
            report_violation_to!(
                &self.violation_observer,
                device = src,
                ViolationSeverity::Warning,
                ViolationKind::Protocol,
                "result from a controller not playing this round"
            );
            return;
        };
        if !self.roster.record(slot, result) {
            report_violation_to!(
                &self.violation_observer,
                device = src,
                ViolationSeverity::Warning,
                ViolationKind::Protocol,
                "duplicate result for {}",
                slot
            );
            return;
        }
        info!(slot = slot.number(), %result, "result");
        match result {
            ResultTime::Millis(_) => self.set_slot_color(slot, ZoneColor::Green, false),
            ResultTime::Penalty => self.set_slot_color(slot, ZoneColor::Red, true),
        }
        if matches!(self.view.scene, LedScene::RandomFast | LedScene::Frozen) {
            self.set_scene(LedScene::Status);
            let waiting: SmallVec<[Slot; MAX_SLOTS]> = self
                .roster
                .active_slots()
                .filter(|other| !self.roster.get(*other).finished)
                .collect();
            for other in waiting {
                self.set_slot_color(other, ZoneColor::Yellow, false);
            }
        }
        self.push_event(GameEvent::ResultRecorded { slot, result });
    }

    fn on_shake_progress(&mut self, src: DeviceId, count: u8, target: u8) {
        if !matches!(self.phase, Phase::ShakeActive) {
            trace!(%src, count, "late shake progress dropped");
            return;
        }
        if let Some(slot) = self.roster.slot_of(src).filter(|slot| self.roster.is_active(*slot)) {
            trace!(slot = slot.number(), count, target, "shake progress");
            self.roster.set_progress(slot, count);
            self.dirty = true;
        }
    }

    // ############
    // # PHASES   #
    // ############

    fn set_phase(&mut self, phase: Phase, now: Instant) {
        let from = self.phase.public();
        let to = phase.public();
        if from != to {
            debug!(%from, %to, round = self.round, "phase transition");
        }
        self.phase = phase;
        self.entered_at = Some(now);
        self.dirty = true;
    }

    fn elapsed(&self, now: Instant) -> Duration {
        self.entered_at
            .map_or(Duration::ZERO, |entered| now.saturating_duration_since(entered))
    }

    fn tick(&mut self, now: Instant) {
        if self.view.flash_until.is_some_and(|until| now >= until) {
            self.view.flash_until = None;
            self.dirty = true;
        }
        let timing = self.config.timing;
        let elapsed = self.elapsed(now);
        match self.phase {
            Phase::Idle => {
                if elapsed >= timing.idle_dwell {
                    self.enter_joining(now);
                }
            },
            Phase::Joining {
                prompt,
                prompt_started,
                completed_at,
            } => match completed_at {
                Some(done) => {
                    if now.saturating_duration_since(done) >= timing.join_settle {
                        self.sound(SoundCue::GetReady);
                        self.enter_countdown(now);
                    }
                },
                None => {
                    if now.saturating_duration_since(prompt_started) >= timing.prompt_timeout {
                        debug!(slot = prompt.number(), "prompt timed out");
                        self.advance_prompt(prompt, now);
                    }
                },
            },
            Phase::Countdown {
                announce,
                next,
                last_tick,
            } => {
                let due = match last_tick {
                    None => elapsed >= announce,
                    Some(tick) => now.saturating_duration_since(tick) >= timing.countdown_tick,
                };
                if due {
                    self.countdown_step(announce, next, now);
                }
            },
            Phase::ReactionWait { announce, delay } => {
                if elapsed >= announce + delay {
                    self.fire_reaction_go(now);
                }
            },
            Phase::ShakeActive => {
                if self.roster.all_active_finished() {
                    self.enter_results(now);
                } else if elapsed >= timing.shake_timeout {
                    info!(round = self.round, "shake round timed out");
                    self.penalize_unfinished(self.config.shake_timeout_blink);
                    self.set_scene(LedScene::Status);
                    self.enter_results(now);
                }
            },
            Phase::Collecting { grace_started } => {
                if self.roster.all_active_finished() {
                    self.finish_collecting(now);
                    return;
                }
                match grace_started {
                    None if elapsed >= timing.collect_timeout => {
                        info!(round = self.round, "collection timed out, grace window open");
                        let waiting: SmallVec<[Slot; MAX_SLOTS]> = self
                            .roster
                            .active_slots()
                            .filter(|slot| !self.roster.get(*slot).finished)
                            .collect();
                        for slot in waiting {
                            self.set_slot_color(slot, ZoneColor::Yellow, false);
                        }
                        self.phase = Phase::Collecting {
                            grace_started: Some(now),
                        };
                    },
                    Some(started)
                        if now.saturating_duration_since(started) >= timing.grace_window =>
                    {
                        self.finish_collecting(now);
                    },
                    _ => {},
                }
            },
            Phase::Results { revealed } => {
                if !revealed && elapsed >= timing.results_reveal {
                    self.reveal_winner(now);
                    self.phase = Phase::Results { revealed: true };
                }
                if elapsed >= timing.results_dwell {
                    self.leave_results(now);
                }
            },
            Phase::Final => {
                if elapsed >= timing.final_dwell {
                    self.enter_idle(now);
                }
            },
        }
    }

    fn enter_idle(&mut self, now: Instant) {
        info!("waiting for players");
        self.roster.reset();
        self.round = 0;
        self.round_config = None;
        self.selector.reset();
        self.introduced = Introduced::default();
        self.sender.clear();
        self.view = View::default();
        self.push_ui(UiCommand::ClearSlotColors);
        self.set_scene(LedScene::IdleRainbow);
        for controller in DeviceId::CONTROLLERS {
            self.send_reliable(controller, MessageBody::ReturnToIdle, now);
        }
        self.send_display(DisplayCommand::Idle, now);
        self.stop_sound();
        self.sound(SoundCue::PressToJoin);
        self.set_phase(Phase::Idle, now);
    }

    fn enter_joining(&mut self, now: Instant) {
        let first = self.roster.next_unbound(None).unwrap_or(Slot::ALL[0]);
        self.set_phase(
            Phase::Joining {
                prompt: first,
                prompt_started: now,
                completed_at: None,
            },
            now,
        );
        self.prompt(first, now);
    }

    fn prompt(&mut self, slot: Slot, now: Instant) {
        debug!(slot = slot.number(), "prompting");
        self.phase = Phase::Joining {
            prompt: slot,
            prompt_started: now,
            completed_at: None,
        };
        self.view.prompt_slot = Some(slot);
        self.send_display(DisplayCommand::PromptSlot { slot }, now);
        self.stop_sound();
        self.sound(SoundCue::PlayerNumber(slot.number()));
        self.set_scene(LedScene::BlinkSlot(slot));
    }

    /// Moves past `after`, either to the next open slot or out of joining.
    fn advance_prompt(&mut self, after: Slot, now: Instant) {
        let joined = self.roster.joined_count();
        if joined == MAX_SLOTS {
            self.complete_join(after, now);
            return;
        }
        match self.roster.next_unbound(Some(after)) {
            Some(slot) => self.prompt(slot, now),
            None if joined >= usize::from(self.config.min_players) => {
                self.complete_join(after, now);
            },
            None => {
                info!(joined, needed = self.config.min_players, "not enough players, prompting again");
                match self.roster.next_unbound(None) {
                    Some(slot) => self.prompt(slot, now),
                    None => self.complete_join(after, now),
                }
            },
        }
    }

    fn complete_join(&mut self, last_prompt: Slot, now: Instant) {
        info!(players = self.roster.joined_count(), "join complete");
        self.view.prompt_slot = None;
        self.set_scene(LedScene::Status);
        self.stop_sound();
        self.phase = Phase::Joining {
            prompt: last_prompt,
            prompt_started: now,
            completed_at: Some(now),
        };
    }

    fn enter_countdown(&mut self, now: Instant) {
        self.roster.reset_round();
        self.clear_slot_colors();
        self.view.countdown = None;
        self.view.round_winner = None;
        self.round = self.round.saturating_add(1);
        let round_config = self.selector.next_round(&self.config, &mut self.rng);
        self.round_config = Some(round_config);
        let first_time = self.introduced.first_time(round_config.mode());
        info!(
            round = self.round,
            mode = ?round_config.mode(),
            param = round_config.wire_param(),
            tie_break = self.roster.tie_break().is_some(),
            "round drawn"
        );

        let timing = self.config.timing;
        let announce = match round_config {
            RoundConfig::Reaction { .. } => {
                self.send_display(DisplayCommand::ReactionMode, now);
                self.sound(SoundCue::ReactionMode);
                if first_time {
                    self.sound(SoundCue::ReactionInstructions);
                    timing.reaction_announce_first
                } else {
                    timing.reaction_announce
                }
            },
            RoundConfig::Shake { target } => {
                self.send_display(DisplayCommand::ShakeMode { target }, now);
                self.sound(SoundCue::ShakeIt);
                if first_time {
                    self.sound(SoundCue::ShakeInstructions);
                }
                self.sound(SoundCue::ShakeTarget(target));
                if first_time {
                    timing.shake_announce_first
                } else {
                    timing.shake_announce
                }
            },
        };
        let start = MessageBody::RoundStart {
            mode: round_config.mode(),
            param: round_config.wire_param(),
        };
        for controller in self.active_controllers() {
            self.send_reliable(controller, start, now);
        }
        self.push_event(GameEvent::RoundStarted {
            round: self.round,
            config: round_config,
        });

        self.set_phase(
            Phase::Countdown {
                announce,
                next: 3,
                last_tick: None,
            },
            now,
        );
        match round_config {
            RoundConfig::Reaction { delay } => {
                // No visible countdown: the delay must not be guessable.
                self.set_scene(LedScene::RandomFast);
                self.set_phase(Phase::ReactionWait { announce, delay }, now);
            },
            RoundConfig::Shake { .. } => self.set_scene(LedScene::Countdown),
        }
    }

    fn countdown_step(&mut self, announce: Duration, next: u8, now: Instant) {
        if next == 0 {
            self.fire_shake_go(now);
            return;
        }
        trace!(n = next, "countdown");
        self.view.countdown = Some(next);
        self.push_ui(UiCommand::ShowCountdown { n: next });
        self.send_display(DisplayCommand::Countdown { n: next }, now);
        for controller in self.active_controllers() {
            self.send_reliable(controller, MessageBody::CountdownTick { n: next }, now);
        }
        self.push_ui(UiCommand::CountdownFlash);
        self.view.flash_until = Some(now + self.config.timing.countdown_flash);
        self.sound(SoundCue::Countdown(next));
        self.phase = Phase::Countdown {
            announce,
            next: next - 1,
            last_tick: Some(now),
        };
        self.dirty = true;
    }

    fn broadcast_go(&mut self, now: Instant) {
        self.send_display(DisplayCommand::Go, now);
        for controller in self.active_controllers() {
            self.send_reliable(controller, MessageBody::Go, now);
        }
        self.push_event(GameEvent::Go { round: self.round });
        info!(round = self.round, "go");
    }

    fn fire_shake_go(&mut self, now: Instant) {
        self.view.countdown = None;
        self.broadcast_go(now);
        self.sound(SoundCue::Beep);
        let timeout_ms =
            u32::try_from(self.config.timing.shake_timeout.as_millis()).unwrap_or(u32::MAX);
        self.set_scene(LedScene::ShakeCountdown { timeout_ms });
        self.set_phase(Phase::ShakeActive, now);
    }

    fn fire_reaction_go(&mut self, now: Instant) {
        self.push_ui(UiCommand::FreezeScene);
        self.view.scene = LedScene::Frozen;
        self.broadcast_go(now);
        self.stop_sound();
        self.sound(SoundCue::Beep);
        self.set_phase(
            Phase::Collecting {
                grace_started: None,
            },
            now,
        );
    }

    fn finish_collecting(&mut self, now: Instant) {
        self.penalize_unfinished(true);
        self.set_scene(LedScene::Status);
        self.enter_results(now);
    }

    fn penalize_unfinished(&mut self, blink: bool) {
        for slot in self.roster.penalize_unfinished() {
            info!(slot = slot.number(), "no result, penalized");
            self.set_slot_color(slot, ZoneColor::Red, blink);
            self.push_event(GameEvent::ResultRecorded {
                slot,
                result: ResultTime::Penalty,
            });
        }
    }

    fn enter_results(&mut self, now: Instant) {
        self.set_phase(Phase::Results { revealed: false }, now);
        let times: SmallVec<[(Slot, ResultTime); MAX_SLOTS]> = self
            .roster
            .active_slots()
            .map(|slot| {
                let time = self.roster.get(slot).result.unwrap_or(ResultTime::Penalty);
                (slot, time)
            })
            .collect();
        for (slot, time) in times {
            self.send_display(DisplayCommand::SlotTime { slot, time }, now);
        }
    }

    fn reveal_winner(&mut self, now: Instant) {
        let winner = self.roster.round_winner();
        if let Some(slot) = winner {
            self.roster.award(slot);
        }
        info!(round = self.round, winner = ?winner.map(Slot::number), "round decided");
        self.view.round_winner = winner;
        self.dirty = true;
        self.send_display(DisplayCommand::RoundWinner(winner), now);
        if let Some(slot) = winner {
            self.sound(SoundCue::PlayerNumber(slot.number()));
            self.sound(SoundCue::Fastest);
        }
        let scores: SmallVec<[(Slot, u8); MAX_SLOTS]> = Slot::ALL
            .into_iter()
            .filter(|slot| self.roster.get(*slot).joined)
            .map(|slot| (slot, self.roster.get(slot).score))
            .collect();
        for (slot, score) in scores {
            self.send_display(DisplayCommand::Score { slot, score }, now);
        }
        self.push_event(GameEvent::RoundFinished {
            round: self.round,
            winner,
        });
    }

    fn leave_results(&mut self, now: Instant) {
        if self.roster.tie_break().is_some() {
            if self
                .roster
                .tie_break_lead()
                .is_some_and(|lead| lead >= self.config.tie_break_lead)
            {
                self.enter_final(now);
            } else {
                self.enter_countdown(now);
            }
            return;
        }
        if self.round < self.config.rounds {
            self.enter_countdown(now);
            return;
        }
        let tied = self
            .roster
            .tied_for_top()
            .filter(|_| self.config.tie_break);
        match tied {
            Some((first, second)) => self.start_tie_break(first, second, now),
            None => self.enter_final(now),
        }
    }

    fn start_tie_break(&mut self, first: Slot, second: Slot, now: Instant) {
        info!(first = first.number(), second = second.number(), "tie-break");
        self.roster.start_tie_break((first, second));
        self.send_display(DisplayCommand::TieBreak { first, second }, now);
        let benched: SmallVec<[DeviceId; MAX_SLOTS]> = Slot::ALL
            .into_iter()
            .filter(|slot| !self.roster.is_active(*slot))
            .filter_map(|slot| self.roster.get(slot).controller)
            .collect();
        for controller in benched {
            self.send_reliable(controller, MessageBody::ReturnToIdle, now);
        }
        self.push_event(GameEvent::TieBreakStarted { first, second });
        self.enter_countdown(now);
    }

    fn enter_final(&mut self, now: Instant) {
        self.set_phase(Phase::Final, now);
        let winner = self.roster.final_winner();
        info!(winner = ?winner.map(Slot::number), "game over");
        self.view.final_winner = winner;
        self.send_display(DisplayCommand::FinalWinner(winner), now);
        self.stop_sound();
        if let Some(slot) = winner {
            self.sound(SoundCue::PlayerWins(slot.number()));
            self.sound(SoundCue::VictoryFanfare);
        }
        self.sound(SoundCue::GameOver);
        self.set_scene(LedScene::IdleRainbow);
        self.push_event(GameEvent::GameOver { winner });
    }

    // ############
    // # OUTPUTS  #
    // ############

    fn active_controllers(&self) -> SmallVec<[DeviceId; MAX_SLOTS]> {
        self.roster.active_controllers().map(|(_, id)| id).collect()
    }

    fn send_reliable(&mut self, dest: DeviceId, body: MessageBody, now: Instant) {
        self.sender
            .send_reliable(self.endpoint.transport_mut(), dest, body, now);
    }

    fn send_display(&mut self, command: DisplayCommand, now: Instant) {
        let body = MessageBody::Display(command);
        if command.is_reliable() {
            self.send_reliable(DeviceId::DISPLAY, body, now);
        } else {
            self.sender
                .send_best_effort(self.endpoint.transport_mut(), DeviceId::DISPLAY, body);
        }
    }

    fn push_ui(&mut self, command: UiCommand) {
        self.pending_ui.push(command);
        if self.pending_ui.len() > MAX_SNAPSHOT_COMMANDS {
            let excess = self.pending_ui.len() - MAX_SNAPSHOT_COMMANDS;
            self.pending_ui.drain(..excess);
        }
        self.dirty = true;
    }

    fn set_scene(&mut self, scene: LedScene) {
        self.view.scene = scene;
        self.push_ui(UiCommand::SetScene(scene));
    }

    fn set_slot_color(&mut self, slot: Slot, color: ZoneColor, blink: bool) {
        let zone = self.config.zone_layout.slot_to_zone(slot);
        self.view.zones[zone.index()] = Some(ZoneOverride { color, blink });
        self.push_ui(UiCommand::SetSlotColor {
            slot,
            zone,
            color,
            blink,
        });
    }

    fn clear_slot_colors(&mut self) {
        self.view.zones = [None; ZONE_COUNT];
        self.push_ui(UiCommand::ClearSlotColors);
    }

    fn sound(&mut self, cue: SoundCue) {
        self.push_ui(UiCommand::PlaySound(cue));
    }

    fn stop_sound(&mut self) {
        self.push_ui(UiCommand::StopSound);
    }

    fn push_event(&mut self, event: GameEvent) {
        self.events.push_back(event);
        while self.events.len() > MAX_EVENT_QUEUE_SIZE {
            self.events.pop_front();
        }
    }

    fn publish(&mut self) {
        let Some(boundary) = &self.boundary else {
            return;
        };
        if !self.dirty && self.pending_ui.is_empty() {
            return;
        }
        let next = self.render_snapshot();
        let commands = &mut self.pending_ui;
        let applied = boundary.try_apply(self.publish_timeout, |snapshot| {
            let mut queued = std::mem::take(&mut snapshot.commands);
            queued.append(commands);
            if queued.len() > MAX_SNAPSHOT_COMMANDS {
                let excess = queued.len() - MAX_SNAPSHOT_COMMANDS;
                queued.drain(..excess);
            }
            *snapshot = RenderSnapshot {
                revision: snapshot.revision,
                commands: queued,
                ..next
            };
        });
        if applied {
            self.dirty = false;
        } else {
            warn!("render snapshot not published, retrying next poll");
        }
    }
}

impl<T: Transport> std::fmt::Debug for Orchestrator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("phase", &self.phase)
            .field("round", &self.round)
            .field("round_config", &self.round_config)
            .field("roster", &self.roster)
            .field("delivery", &self.sender.stats())
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
    use crate::config::TimingConfig;
    use crate::network::loopback::{LoopbackBus, LoopbackPort};
    use crate::network::messages::codes;
    use crate::rng::SeedableRng;
    use crate::telemetry::CollectingObserver;
    use outputs::{ZoneId, ZoneLayout};
    use smallvec::smallvec;

    fn slot(n: u8) -> Slot {
        Slot::from_number(n).unwrap()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn reaction_only() -> GameConfig {
        GameConfig {
            rounds: 2,
            modes: smallvec![GameMode::Reaction],
            reaction_delays: smallvec![Duration::from_secs(10)],
            timing: TimingConfig::quick(),
            ..GameConfig::default()
        }
    }

    fn shake_only() -> GameConfig {
        GameConfig {
            rounds: 1,
            modes: smallvec![GameMode::Shake],
            shake_targets: smallvec![10],
            timing: TimingConfig::quick(),
            ..GameConfig::default()
        }
    }

    struct Rig {
        coordinator: Orchestrator<LoopbackPort>,
        sticks: Vec<Endpoint<LoopbackPort>>,
        display: Endpoint<LoopbackPort>,
        observer: Arc<CollectingObserver>,
        start: Instant,
    }

    impl Rig {
        fn new(config: GameConfig) -> Self {
            let bus = LoopbackBus::new();
            let observer = Arc::new(CollectingObserver::new());
            let coordinator = Orchestrator::new(
                config,
                bus.port(DeviceId::HOST),
                Pcg32::seed_from_u64(42),
            )
            .unwrap()
            .with_violation_observer(observer.clone());
            let sticks = DeviceId::CONTROLLERS
                .iter()
                .map(|id| Endpoint::new(*id, bus.port(*id)))
                .collect();
            let display = Endpoint::new(DeviceId::DISPLAY, bus.port(DeviceId::DISPLAY));
            Self {
                coordinator,
                sticks,
                display,
                observer,
                start: Instant::now(),
            }
        }

        fn at(&mut self, millis: u64) {
            self.coordinator.poll(self.start + ms(millis));
        }

        fn from_stick(&mut self, number: u8, body: MessageBody) {
            let src = DeviceId::stick(number).unwrap();
            self.sticks[usize::from(number - 1)].send(&Message::new(DeviceId::HOST, src, body));
        }

        fn from_display(&mut self, body: MessageBody) {
            self.display
                .send(&Message::new(DeviceId::HOST, DeviceId::DISPLAY, body));
        }

        fn stick_inbox(&mut self, number: u8) -> Vec<MessageBody> {
            self.sticks[usize::from(number - 1)]
                .poll_messages()
                .into_iter()
                .map(|message| message.body)
                .collect()
        }

        fn display_inbox(&mut self) -> Vec<DisplayCommand> {
            self.display
                .poll_messages()
                .into_iter()
                .filter_map(|message| match message.body {
                    MessageBody::Display(command) => Some(command),
                    _ => None,
                })
                .collect()
        }

        fn join(&mut self, stick: u8) {
            self.from_stick(
                stick,
                MessageBody::JoinRequest {
                    firmware: FirmwareVersion::new(1, 0, 0),
                },
            );
        }

        /// Idle at 0, joining at 300, sticks 1..=n claim slots 1..=n at
        /// 400, 500, ...
        fn seat(&mut self, players: u8) -> u64 {
            self.at(0);
            self.at(300);
            let mut t = 300;
            for stick in 1..=players {
                t += 100;
                self.join(stick);
                self.at(t);
            }
            t
        }
    }

    #[test]
    fn first_poll_enters_idle_and_resets_devices() {
        let mut rig = Rig::new(reaction_only());
        rig.at(0);
        assert_eq!(rig.coordinator.phase(), GamePhase::Idle);
        for number in 1..=4 {
            assert!(rig.stick_inbox(number).contains(&MessageBody::ReturnToIdle));
        }
        assert_eq!(rig.display_inbox(), vec![DisplayCommand::Idle]);
        let ui = rig.coordinator.take_ui_commands();
        assert!(ui.contains(&UiCommand::PlaySound(SoundCue::PressToJoin)));
        assert!(ui.contains(&UiCommand::SetScene(LedScene::IdleRainbow)));
    }

    #[test]
    fn idle_dwell_then_prompt_slot_one() {
        let mut rig = Rig::new(reaction_only());
        rig.at(0);
        rig.at(299);
        assert_eq!(rig.coordinator.phase(), GamePhase::Idle);
        rig.at(300);
        assert_eq!(rig.coordinator.phase(), GamePhase::Joining);
        let shown = rig.display_inbox();
        assert!(shown.contains(&DisplayCommand::PromptSlot { slot: slot(1) }));
        assert_eq!(
            rig.coordinator.render_snapshot().scene,
            LedScene::BlinkSlot(slot(1))
        );
    }

    #[test]
    fn skip_wait_leaves_idle_early() {
        let mut rig = Rig::new(reaction_only());
        rig.at(0);
        rig.from_display(MessageBody::SkipWait);
        rig.at(10);
        assert_eq!(rig.coordinator.phase(), GamePhase::Joining);
    }

    #[test]
    fn claim_binds_slot_and_confirms() {
        let mut rig = Rig::new(reaction_only());
        rig.at(0);
        rig.at(300);
        rig.display_inbox();
        rig.stick_inbox(2);
        rig.join(2);
        rig.at(350);

        let entry = rig.coordinator.roster().get(slot(1));
        assert!(entry.joined);
        assert_eq!(entry.controller, Some(DeviceId::STICK2));
        assert!(rig
            .stick_inbox(2)
            .contains(&MessageBody::JoinConfirm { slot: slot(1) }));
        let shown = rig.display_inbox();
        assert!(shown.contains(&DisplayCommand::SlotReady {
            slot: slot(1),
            controller: DeviceId::STICK2
        }));
        assert!(shown.contains(&DisplayCommand::PromptSlot { slot: slot(2) }));
        // slot 1 is zone 4 on the reversed layout
        assert_eq!(
            rig.coordinator.render_snapshot().zones[ZoneId(4).index()],
            Some(ZoneOverride {
                color: ZoneColor::Blue,
                blink: false
            })
        );
    }

    #[test]
    fn second_claim_by_seated_controller_is_refused() {
        let mut rig = Rig::new(reaction_only());
        rig.at(0);
        rig.at(300);
        rig.join(1);
        rig.at(310);
        rig.join(1);
        rig.at(320);
        assert_eq!(rig.coordinator.roster().joined_count(), 1);
        assert!(!rig.coordinator.roster().get(slot(2)).joined);
        crate::assert_violation!(rig.observer, ViolationKind::Join);
    }

    #[test]
    fn join_request_outside_joining_is_ignored() {
        let mut rig = Rig::new(reaction_only());
        rig.at(0);
        rig.join(1);
        rig.at(10);
        assert_eq!(rig.coordinator.roster().joined_count(), 0);
        assert_eq!(rig.coordinator.phase(), GamePhase::Idle);
    }

    #[test]
    fn prompt_timeout_moves_to_next_slot() {
        let mut rig = Rig::new(reaction_only());
        rig.at(0);
        rig.at(300);
        rig.display_inbox();
        rig.at(1799);
        assert!(!rig
            .display_inbox()
            .contains(&DisplayCommand::PromptSlot { slot: slot(2) }));
        rig.at(1800);
        assert!(rig
            .display_inbox()
            .contains(&DisplayCommand::PromptSlot { slot: slot(2) }));
    }

    #[test]
    fn too_few_players_prompts_again_instead_of_idling() {
        let mut rig = Rig::new(reaction_only());
        rig.at(0);
        rig.at(300);
        rig.join(3);
        rig.at(400); // slot 1
        // slots 2, 3 and 4 time out
        rig.at(1900);
        rig.at(3400);
        rig.at(4900);
        assert_eq!(rig.coordinator.phase(), GamePhase::Joining);
        assert_eq!(rig.coordinator.render_snapshot().prompt_slot, Some(slot(2)));
        assert_eq!(rig.coordinator.roster().joined_count(), 1);
    }

    #[test]
    fn four_claims_complete_join_immediately() {
        let mut rig = Rig::new(reaction_only());
        let t = rig.seat(4);
        assert_eq!(rig.coordinator.render_snapshot().prompt_slot, None);
        assert_eq!(rig.coordinator.render_snapshot().scene, LedScene::Status);
        rig.at(t + 199);
        assert_eq!(rig.coordinator.phase(), GamePhase::Joining);
        rig.at(t + 200);
        assert_eq!(rig.coordinator.phase(), GamePhase::ReactionWait);
        assert_eq!(rig.coordinator.round(), 1);
    }

    #[test]
    fn reaction_go_waits_for_announcements_and_delay() {
        let mut rig = Rig::new(reaction_only());
        let t = rig.seat(4);
        let countdown_at = t + 200;
        rig.at(countdown_at);
        assert!(rig.stick_inbox(1).contains(&MessageBody::RoundStart {
            mode: GameMode::Reaction,
            param: 0
        }));
        assert!(rig
            .coordinator
            .take_ui_commands()
            .contains(&UiCommand::PlaySound(SoundCue::ReactionInstructions)));

        // first reaction round: 600 ms of announcements, then the 10 s delay
        rig.at(countdown_at + 10_599);
        assert_eq!(rig.coordinator.phase(), GamePhase::ReactionWait);
        assert!(!rig.stick_inbox(1).contains(&MessageBody::Go));
        rig.at(countdown_at + 10_600);
        assert_eq!(rig.coordinator.phase(), GamePhase::Collecting);
        assert!(rig.stick_inbox(1).contains(&MessageBody::Go));
        assert!(rig.display_inbox().contains(&DisplayCommand::Go));
        assert_eq!(rig.coordinator.render_snapshot().scene, LedScene::Frozen);
    }

    #[test]
    fn acked_round_start_is_not_retried() {
        let mut rig = Rig::new(reaction_only());
        let t = rig.seat(2);
        rig.at(t + 1500); // slot 3 prompt times out
        rig.at(t + 3000); // slot 4 prompt times out, join complete
        rig.at(t + 3200);
        assert_eq!(rig.coordinator.phase(), GamePhase::ReactionWait);
        rig.from_stick(
            1,
            MessageBody::Ack {
                acked: codes::ROUND_START,
            },
        );
        rig.at(t + 3210);
        assert!(rig.coordinator.sender().pending(DeviceId::STICK1).is_none());
        assert!(rig.coordinator.sender().pending(DeviceId::STICK2).is_some());
    }

    fn play_to_collecting(rig: &mut Rig, players: u8) -> u64 {
        let t = rig.seat(players);
        let mut now = t;
        for _ in players..4 {
            now += 1500;
            rig.at(now);
        }
        now += 200;
        rig.at(now);
        now += 10_600;
        rig.at(now);
        assert_eq!(rig.coordinator.phase(), GamePhase::Collecting);
        rig.coordinator.events().for_each(drop);
        rig.coordinator.take_ui_commands();
        now
    }

    #[test]
    fn first_result_switches_scene_and_marks_waiting_slots() {
        let mut rig = Rig::new(reaction_only());
        let go = play_to_collecting(&mut rig, 3);
        rig.from_stick(2, MessageBody::ReactionResult(ResultTime::Millis(180)));
        rig.at(go + 180);

        let snapshot = rig.coordinator.render_snapshot();
        assert_eq!(snapshot.scene, LedScene::Status);
        let layout = ZoneLayout::default();
        let zone = |n| layout.slot_to_zone(slot(n)).index();
        assert_eq!(snapshot.zones[zone(2)].unwrap().color, ZoneColor::Green);
        assert_eq!(snapshot.zones[zone(1)].unwrap().color, ZoneColor::Yellow);
        assert_eq!(snapshot.zones[zone(3)].unwrap().color, ZoneColor::Yellow);
        assert_eq!(
            rig.coordinator.events().collect::<Vec<_>>(),
            vec![GameEvent::ResultRecorded {
                slot: slot(2),
                result: ResultTime::Millis(180)
            }]
        );
    }

    #[test]
    fn duplicate_and_stray_results_are_reported_not_applied() {
        let mut rig = Rig::new(reaction_only());
        let go = play_to_collecting(&mut rig, 2);
        rig.from_stick(1, MessageBody::ReactionResult(ResultTime::Millis(200)));
        rig.from_stick(1, MessageBody::ReactionResult(ResultTime::Millis(100)));
        rig.from_stick(4, MessageBody::ReactionResult(ResultTime::Millis(50)));
        rig.from_stick(2, MessageBody::ShakeResult(ResultTime::Millis(50)));
        rig.at(go + 200);

        assert_eq!(
            rig.coordinator.roster().get(slot(1)).result,
            Some(ResultTime::Millis(200))
        );
        assert!(!rig.coordinator.roster().get(slot(2)).finished);
        assert_eq!(
            rig.observer.violations_of_kind(ViolationKind::Protocol).len(),
            3
        );
        assert_eq!(rig.coordinator.phase(), GamePhase::Collecting);
    }

    #[test]
    fn grace_window_then_penalty() {
        let mut rig = Rig::new(reaction_only());
        let go = play_to_collecting(&mut rig, 2);
        rig.from_stick(1, MessageBody::ReactionResult(ResultTime::Millis(300)));
        rig.at(go + 300);

        let zone2 = ZoneLayout::default().slot_to_zone(slot(2)).index();
        rig.at(go + 5000);
        assert_eq!(rig.coordinator.phase(), GamePhase::Collecting);
        assert_eq!(
            rig.coordinator.render_snapshot().zones[zone2],
            Some(ZoneOverride {
                color: ZoneColor::Yellow,
                blink: false
            })
        );
        rig.at(go + 6999);
        assert_eq!(rig.coordinator.phase(), GamePhase::Collecting);
        rig.at(go + 7000);
        assert_eq!(rig.coordinator.phase(), GamePhase::Results);
        assert_eq!(
            rig.coordinator.roster().get(slot(2)).result,
            Some(ResultTime::Penalty)
        );
        assert_eq!(
            rig.coordinator.render_snapshot().zones[zone2],
            Some(ZoneOverride {
                color: ZoneColor::Red,
                blink: true
            })
        );
    }

    #[test]
    fn late_result_inside_grace_still_counts() {
        let mut rig = Rig::new(reaction_only());
        let go = play_to_collecting(&mut rig, 2);
        rig.at(go + 5000);
        rig.from_stick(1, MessageBody::ReactionResult(ResultTime::Millis(5500)));
        rig.from_stick(2, MessageBody::ReactionResult(ResultTime::Millis(6000)));
        rig.at(go + 6000);
        assert_eq!(rig.coordinator.phase(), GamePhase::Results);
        rig.at(go + 6300);
        assert_eq!(rig.coordinator.roster().get(slot(1)).score, 1);
    }

    #[test]
    fn results_reveal_then_next_round() {
        let mut rig = Rig::new(reaction_only());
        let go = play_to_collecting(&mut rig, 2);
        rig.display_inbox();
        rig.from_stick(1, MessageBody::ReactionResult(ResultTime::Millis(250)));
        rig.from_stick(2, MessageBody::ReactionResult(ResultTime::Millis(240)));
        rig.at(go + 250);
        assert_eq!(rig.coordinator.phase(), GamePhase::Results);
        let shown = rig.display_inbox();
        assert!(shown.contains(&DisplayCommand::SlotTime {
            slot: slot(1),
            time: ResultTime::Millis(250)
        }));
        assert!(!shown.contains(&DisplayCommand::RoundWinner(Some(slot(2)))));

        rig.at(go + 550);
        assert_eq!(rig.coordinator.roster().get(slot(2)).score, 1);
        let shown = rig.display_inbox();
        assert!(shown.contains(&DisplayCommand::RoundWinner(Some(slot(2)))));
        assert!(shown.contains(&DisplayCommand::Score {
            slot: slot(2),
            score: 1
        }));

        rig.at(go + 850);
        assert_eq!(rig.coordinator.phase(), GamePhase::ReactionWait);
        assert_eq!(rig.coordinator.round(), 2);
        // second reaction round uses the short announcement
        assert!(!rig
            .coordinator
            .take_ui_commands()
            .contains(&UiCommand::PlaySound(SoundCue::ReactionInstructions)));
    }

    #[test]
    fn last_round_leads_to_final_then_idle() {
        let mut rig = Rig::new(GameConfig {
            rounds: 1,
            ..reaction_only()
        });
        let go = play_to_collecting(&mut rig, 2);
        rig.from_stick(1, MessageBody::ReactionResult(ResultTime::Millis(150)));
        rig.from_stick(2, MessageBody::ReactionResult(ResultTime::Penalty));
        rig.at(go + 150);
        rig.at(go + 450);
        rig.display_inbox();
        rig.at(go + 750);
        assert_eq!(rig.coordinator.phase(), GamePhase::Final);
        assert!(rig
            .display_inbox()
            .contains(&DisplayCommand::FinalWinner(Some(slot(1)))));
        let ui = rig.coordinator.take_ui_commands();
        assert!(ui.contains(&UiCommand::PlaySound(SoundCue::PlayerWins(1))));
        assert!(ui.ends_with(&[
            UiCommand::PlaySound(SoundCue::GameOver),
            UiCommand::SetScene(LedScene::IdleRainbow)
        ]));

        rig.at(go + 1749);
        assert_eq!(rig.coordinator.phase(), GamePhase::Final);
        rig.at(go + 1750);
        assert_eq!(rig.coordinator.phase(), GamePhase::Idle);
        assert_eq!(rig.coordinator.roster().joined_count(), 0);
        assert_eq!(rig.coordinator.round(), 0);
    }

    #[test]
    fn tie_on_top_score_starts_sudden_death() {
        let mut rig = Rig::new(reaction_only());
        let go = play_to_collecting(&mut rig, 3);
        // round 1: slot 1 wins
        rig.from_stick(1, MessageBody::ReactionResult(ResultTime::Millis(100)));
        rig.from_stick(2, MessageBody::ReactionResult(ResultTime::Millis(200)));
        rig.from_stick(3, MessageBody::ReactionResult(ResultTime::Millis(300)));
        rig.at(go + 300);
        rig.at(go + 600);
        rig.at(go + 900);
        assert_eq!(rig.coordinator.round(), 2);
        // round 2: slot 2 wins after 300 ms announce + 10 s delay
        let go2 = go + 900 + 10_300;
        rig.at(go2);
        assert_eq!(rig.coordinator.phase(), GamePhase::Collecting);
        rig.from_stick(1, MessageBody::ReactionResult(ResultTime::Millis(220)));
        rig.from_stick(2, MessageBody::ReactionResult(ResultTime::Millis(210)));
        rig.from_stick(3, MessageBody::ReactionResult(ResultTime::Penalty));
        rig.at(go2 + 220);
        rig.at(go2 + 520);
        rig.display_inbox();
        rig.stick_inbox(1);
        rig.stick_inbox(3);
        rig.at(go2 + 820);

        assert_eq!(rig.coordinator.roster().tie_break(), Some((slot(1), slot(2))));
        assert_eq!(rig.coordinator.round(), 3);
        assert!(rig.display_inbox().contains(&DisplayCommand::TieBreak {
            first: slot(1),
            second: slot(2)
        }));
        assert!(rig.stick_inbox(3).contains(&MessageBody::ReturnToIdle));
        assert!(!rig.stick_inbox(1).contains(&MessageBody::ReturnToIdle));
        assert!(rig
            .coordinator
            .events()
            .any(|event| event == GameEvent::TieBreakStarted {
                first: slot(1),
                second: slot(2)
            }));
    }

    #[test]
    fn scoreless_tie_still_goes_to_sudden_death() {
        let mut rig = Rig::new(GameConfig {
            rounds: 1,
            ..reaction_only()
        });
        let go = play_to_collecting(&mut rig, 2);
        rig.from_stick(1, MessageBody::ReactionResult(ResultTime::Penalty));
        rig.from_stick(2, MessageBody::ReactionResult(ResultTime::Penalty));
        rig.at(go + 10);
        rig.at(go + 310);
        rig.at(go + 610);

        assert_eq!(rig.coordinator.roster().get(slot(1)).score, 0);
        assert_eq!(rig.coordinator.roster().get(slot(2)).score, 0);
        assert_eq!(rig.coordinator.roster().tie_break(), Some((slot(1), slot(2))));
        assert_ne!(rig.coordinator.phase(), GamePhase::Final);
        assert_eq!(rig.coordinator.round(), 2);
        assert!(rig
            .coordinator
            .events()
            .any(|event| event == GameEvent::TieBreakStarted {
                first: slot(1),
                second: slot(2)
            }));
    }

    #[test]
    fn scoreless_tie_without_tie_break_ends_the_game() {
        let mut rig = Rig::new(GameConfig {
            rounds: 1,
            tie_break: false,
            ..reaction_only()
        });
        let go = play_to_collecting(&mut rig, 2);
        rig.from_stick(1, MessageBody::ReactionResult(ResultTime::Penalty));
        rig.from_stick(2, MessageBody::ReactionResult(ResultTime::Penalty));
        rig.at(go + 10);
        rig.at(go + 310);
        rig.at(go + 610);

        assert_eq!(rig.coordinator.phase(), GamePhase::Final);
        assert_eq!(rig.coordinator.roster().tie_break(), None);
    }

    #[test]
    fn untaken_ui_commands_are_capped_oldest_first() {
        let mut rig = Rig::new(reaction_only());
        rig.at(0);
        // Nobody joins, so the prompt cycles and keeps queueing commands.
        let mut t = 300;
        for _ in 0..200 {
            rig.at(t);
            t += 1500;
        }
        assert_eq!(rig.coordinator.phase(), GamePhase::Joining);

        let prompt = rig.coordinator.render_snapshot().prompt_slot.unwrap();
        let ui = rig.coordinator.take_ui_commands();
        assert_eq!(ui.len(), MAX_SNAPSHOT_COMMANDS);
        assert_eq!(ui.last(), Some(&UiCommand::SetScene(LedScene::BlinkSlot(prompt))));
        assert!(rig.coordinator.take_ui_commands().is_empty());
    }

    #[test]
    fn shake_round_counts_down_then_times_out() {
        let mut rig = Rig::new(shake_only());
        let t = rig.seat(2);
        rig.at(t + 1500);
        rig.at(t + 3000);
        let countdown_at = t + 3200;
        rig.at(countdown_at);
        assert_eq!(rig.coordinator.phase(), GamePhase::Countdown);
        assert!(rig.stick_inbox(1).contains(&MessageBody::RoundStart {
            mode: GameMode::Shake,
            param: 10
        }));
        rig.display_inbox();

        // 600 ms first-time announcement, then 3, 2, 1 every 250 ms, then go
        let first_tick = countdown_at + 600;
        for (i, n) in [3u8, 2, 1].into_iter().enumerate() {
            rig.at(first_tick + 250 * i as u64);
            assert_eq!(rig.coordinator.render_snapshot().countdown, Some(n));
            assert!(rig.coordinator.render_snapshot().flash);
            assert!(rig.display_inbox().contains(&DisplayCommand::Countdown { n }));
            assert!(rig
                .stick_inbox(2)
                .contains(&MessageBody::CountdownTick { n }));
        }
        rig.at(first_tick + 550);
        assert!(!rig.coordinator.render_snapshot().flash);
        let go = first_tick + 750;
        rig.at(go);
        assert_eq!(rig.coordinator.phase(), GamePhase::ShakeActive);
        assert!(rig.stick_inbox(1).contains(&MessageBody::Go));
        assert_eq!(
            rig.coordinator.render_snapshot().scene,
            LedScene::ShakeCountdown { timeout_ms: 15_000 }
        );

        rig.from_stick(
            1,
            MessageBody::ShakeProgress {
                count: 4,
                target: 10,
            },
        );
        rig.from_stick(1, MessageBody::ShakeResult(ResultTime::Millis(4200)));
        rig.at(go + 4200);
        assert_eq!(rig.coordinator.roster().get(slot(1)).shake_progress, 4);
        rig.at(go + 15_000);
        assert_eq!(rig.coordinator.phase(), GamePhase::Results);
        let zone2 = ZoneLayout::default().slot_to_zone(slot(2)).index();
        assert_eq!(
            rig.coordinator.render_snapshot().zones[zone2],
            Some(ZoneOverride {
                color: ZoneColor::Red,
                blink: false
            })
        );
    }

    #[test]
    fn boundary_receives_snapshot_and_commands() {
        let bus = LoopbackBus::new();
        let boundary = StateBoundary::new();
        let mut coordinator = Orchestrator::new(
            reaction_only(),
            bus.port(DeviceId::HOST),
            Pcg32::seed_from_u64(1),
        )
        .unwrap()
        .with_boundary(boundary.clone());
        let start = Instant::now();
        coordinator.poll(start);
        coordinator.poll(start + ms(300));

        let snapshot = boundary.snapshot(ms(5)).unwrap();
        assert_eq!(snapshot.phase, GamePhase::Joining);
        assert_eq!(snapshot.prompt_slot, Some(slot(1)));
        assert_eq!(snapshot.rounds, 2);
        let commands = boundary.take_commands(ms(5)).unwrap();
        assert_eq!(
            commands.first(),
            Some(&UiCommand::ClearSlotColors)
        );
        assert!(commands.contains(&UiCommand::PlaySound(SoundCue::PlayerNumber(1))));
        assert!(coordinator.take_ui_commands().is_empty());
    }

    #[test]
    fn non_controller_traffic_is_a_protocol_violation() {
        let mut rig = Rig::new(reaction_only());
        rig.at(0);
        rig.from_display(MessageBody::ReactionResult(ResultTime::Millis(1)));
        rig.from_stick(2, MessageBody::Error { code: 0x0042 });
        rig.at(5);
        assert_eq!(
            rig.observer.violations_of_kind(ViolationKind::Protocol).len(),
            2
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bus = LoopbackBus::new();
        let config = GameConfig {
            rounds: 0,
            ..GameConfig::default()
        };
        assert!(
            Orchestrator::new(config, bus.port(DeviceId::HOST), Pcg32::seed_from_u64(0)).is_err()
        );
    }
}
