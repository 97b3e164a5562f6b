//! The controller side of a game.
//!
//! A [`PeerTimingUnit`] runs on every handheld controller. It answers the
//! coordinator's commands, asks to join when its button is held in Idle, and
//! times the player once the go event arrives.
//!
//! # State Machine
//!
//! ```text
//!            round-start                go (reaction)
//!   ┌──────┐ ──────────► ┌───────────┐ ─────────────► ┌────────────────┐
//!   │ Idle │             │ WaitingGo │                │ TimingReaction │
//!   └──────┘ ◄────┐      └─────┬─────┘                └───────┬────────┘
//!                 │            │ go (shake)                   │ edge / timeout
//!   return-to-idle│            ▼                              ▼
//!                 │      ┌───────────────┐  target / timeout ┌──────┐
//!                 └──────│ CountingShake │ ─────────────────►│ Done │
//!                        └───────────────┘                   └──────┘
//! ```
//!
//! A go in reaction mode while the button is already down reports the penalty
//! and goes straight to Done. Every state returns to Idle on return-to-idle and
//! to WaitingGo on the next round-start.
//!
//! # Timing
//!
//! The go is latched at the poll that receives it. A reaction is measured from
//! there to the button edge recorded by [`EdgeCapture`]: wire the button
//! interrupt to [`EdgeCapture::on_press`] through [`PeerTimingUnit::capture`] for
//! microsecond edges. Without an interrupt the unit falls back to sampling the
//! button level on each poll.

pub mod capture;
pub mod haptic;
pub mod shake;

pub use shake::AccelSample;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};
use web_time::{Duration, Instant};

use crate::config::PeerConfig;
use crate::network::messages::{GameMode, HapticPulse, Message, MessageBody};
use crate::network::transport::{Endpoint, Transport};
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{report_violation_to, DeviceId, DuelError, ResultTime, Slot};

use capture::{Debouncer, EdgeCapture};
use haptic::HapticMotor;
use shake::ShakeDetector;

/// Where a controller is in the current round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerState {
    /// Between games, or waiting to join.
    #[default]
    Idle,
    /// Round configured, waiting for the go.
    WaitingGo,
    /// Go received in reaction mode; waiting for the button.
    TimingReaction,
    /// Go received in shake mode; counting shakes.
    CountingShake,
    /// Result sent for this round.
    Done,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::WaitingGo => "waiting-go",
            Self::TimingReaction => "timing-reaction",
            Self::CountingShake => "counting-shake",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Sensor readings for one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerInputs {
    /// Raw button level, `true` while pressed.
    pub button_down: bool,
    /// A fresh accelerometer sample, if one was read since the last poll.
    pub accel: Option<AccelSample>,
}

impl PeerInputs {
    /// Button level only.
    #[must_use]
    pub const fn button(down: bool) -> Self {
        Self {
            button_down: down,
            accel: None,
        }
    }

    /// Released button and one accelerometer sample.
    #[must_use]
    pub const fn sample(sample: AccelSample) -> Self {
        Self {
            button_down: false,
            accel: Some(sample),
        }
    }
}

/// The round the coordinator configured last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RoundSetup {
    mode: GameMode,
    param: u8,
}

/// One controller's timing state machine.
///
/// # Example
///
/// ```
/// use reflex_duel::network::loopback::LoopbackBus;
/// use reflex_duel::peer::PeerInputs;
/// use reflex_duel::{DeviceId, Endpoint, Message, MessageBody, PeerConfig, PeerState, PeerTimingUnit};
/// use reflex_duel::network::messages::GameMode;
/// use web_time::{Duration, Instant};
///
/// let bus = LoopbackBus::new();
/// let mut host = Endpoint::new(DeviceId::HOST, bus.port(DeviceId::HOST));
/// let start = Instant::now();
/// let mut stick = PeerTimingUnit::new(
///     PeerConfig::new(DeviceId::STICK1),
///     bus.port(DeviceId::STICK1),
///     start,
/// )
/// .unwrap();
///
/// let round = MessageBody::RoundStart { mode: GameMode::Reaction, param: 0 };
/// host.send(&Message::new(DeviceId::STICK1, DeviceId::HOST, round));
/// stick.poll(start, PeerInputs::default());
/// assert_eq!(stick.state(), PeerState::WaitingGo);
///
/// host.send(&Message::new(DeviceId::STICK1, DeviceId::HOST, MessageBody::Go));
/// stick.poll(start + Duration::from_millis(10), PeerInputs::default());
/// assert_eq!(stick.state(), PeerState::TimingReaction);
///
/// stick.capture().on_press(start + Duration::from_millis(190));
/// stick.poll(start + Duration::from_millis(200), PeerInputs::default());
/// assert_eq!(stick.state(), PeerState::Done);
/// ```
pub struct PeerTimingUnit<T: Transport> {
    config: PeerConfig,
    endpoint: Endpoint<T>,
    state: PeerState,
    round: Option<RoundSetup>,
    slot: Option<Slot>,
    capture: Arc<EdgeCapture>,
    /// Go received this poll, applied after message handling.
    go_latched: Option<Instant>,
    go_at: Option<Instant>,
    button: Debouncer,
    join_sent: bool,
    detector: ShakeDetector,
    haptic: HapticMotor,
    last_result: Option<ResultTime>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl<T: Transport> PeerTimingUnit<T> {
    /// Creates an idle controller. `epoch` anchors edge timestamps.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`PeerConfig::validate`].
    pub fn new(config: PeerConfig, transport: T, epoch: Instant) -> Result<Self, DuelError> {
        config.validate()?;
        Ok(Self {
            endpoint: Endpoint::new(config.id, transport),
            state: PeerState::Idle,
            round: None,
            slot: None,
            capture: Arc::new(EdgeCapture::new(epoch)),
            go_latched: None,
            go_at: None,
            button: Debouncer::new(config.debounce),
            join_sent: false,
            detector: ShakeDetector::new(config.detector),
            haptic: HapticMotor::new(),
            last_result: None,
            violation_observer: None,
            config,
        })
    }

    /// Routes violations to `observer` instead of the tracing default.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.endpoint = self.endpoint.with_violation_observer(observer.clone());
        self.violation_observer = Some(observer);
        self
    }

    /// Handle for the button interrupt.
    #[must_use]
    pub fn capture(&self) -> Arc<EdgeCapture> {
        Arc::clone(&self.capture)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Slot confirmed by the coordinator in this game.
    #[must_use]
    pub fn slot(&self) -> Option<Slot> {
        self.slot
    }

    /// Mode of the configured round.
    #[must_use]
    pub fn mode(&self) -> Option<GameMode> {
        self.round.map(|round| round.mode)
    }

    /// Shakes counted in the current round.
    #[must_use]
    pub fn shake_count(&self) -> u8 {
        self.detector.count()
    }

    /// When the go of the current round was received.
    #[must_use]
    pub fn go_time(&self) -> Option<Instant> {
        self.go_at
    }

    /// Result sent for the latest round.
    #[must_use]
    pub fn last_result(&self) -> Option<ResultTime> {
        self.last_result
    }

    /// The vibration motor.
    #[must_use]
    pub fn haptic(&self) -> &HapticMotor {
        &self.haptic
    }

    /// This controller's configuration.
    #[must_use]
    pub fn config(&self) -> &PeerConfig {
        &self.config
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

    /// Runs one iteration of the controller loop.
    pub fn poll(&mut self, now: Instant, inputs: PeerInputs) {
        self.haptic.update(now);
        for message in self.endpoint.poll_messages() {
            self.handle_message(message, now);
        }
        if let Some(go_at) = self.go_latched.take() {
            self.apply_go(go_at, now, inputs);
        }
        let pressed = self.button.update(inputs.button_down, now);
        match self.state {
            PeerState::Idle => self.join_step(pressed),
            PeerState::TimingReaction => self.reaction_step(now, inputs),
            PeerState::CountingShake => self.shake_step(now, inputs),
            PeerState::WaitingGo | PeerState::Done => {},
        }
    }

    fn handle_message(&mut self, message: Message, now: Instant) {
        if message.src != DeviceId::HOST {
            report_violation_to!(
                &self.violation_observer,
                device = message.src,
                ViolationSeverity::Warning,
                ViolationKind::Protocol,
                "{} ignored {:?}: not from the coordinator",
                self.config.id,
                message.body
            );
            return;
        }
        if message.body.expects_ack() {
            self.send(MessageBody::Ack {
                acked: message.body.code(),
            });
        }
        match message.body {
            MessageBody::ReturnToIdle => self.enter_idle(),
            MessageBody::JoinConfirm { slot } => {
                info!(stick = %self.config.id, %slot, "joined");
                self.slot = Some(slot);
                self.haptic.start(now, self.config.haptic_join);
            },
            MessageBody::RoundStart { mode, param } => {
                debug!(stick = %self.config.id, ?mode, param, "round configured");
                self.round = Some(RoundSetup { mode, param });
                self.capture.clear();
                self.go_latched = None;
                self.go_at = None;
                self.last_result = None;
                self.detector.reset();
                self.set_state(PeerState::WaitingGo);
            },
            MessageBody::Go | MessageBody::Haptic(HapticPulse::GoMarker) => self.on_go(now),
            MessageBody::Haptic(HapticPulse::Tens(tens)) => {
                self.haptic
                    .start(now, Duration::from_millis(u64::from(tens) * 10));
            },
            MessageBody::CountdownTick { n } => {
                trace!(stick = %self.config.id, n, "countdown");
                self.haptic.start(now, self.config.haptic_countdown);
            },
            body => trace!(stick = %self.config.id, ?body, "ignored"),
        }
    }

    fn on_go(&mut self, now: Instant) {
        if self.state == PeerState::WaitingGo {
            self.go_latched = Some(now);
        } else {
            // retransmitted go after the round already started
            trace!(stick = %self.config.id, state = %self.state, "go ignored");
        }
    }

    fn apply_go(&mut self, go_at: Instant, now: Instant, inputs: PeerInputs) {
        let Some(round) = self.round else {
            return;
        };
        self.go_at = Some(go_at);
        self.haptic.start(now, self.config.haptic_go);
        match round.mode {
            GameMode::Reaction if inputs.button_down => {
                info!(stick = %self.config.id, "button held at go");
                self.finish(ResultTime::Penalty, GameMode::Reaction);
            },
            GameMode::Reaction => {
                self.capture.arm();
                self.set_state(PeerState::TimingReaction);
            },
            GameMode::Shake => {
                self.detector.reset();
                self.set_state(PeerState::CountingShake);
            },
        }
    }

    fn join_step(&mut self, pressed: bool) {
        if !pressed {
            self.join_sent = false;
            return;
        }
        if self.join_sent {
            return;
        }
        self.join_sent = true;
        if self.slot.is_none() {
            debug!(stick = %self.config.id, "join request");
            self.send(MessageBody::JoinRequest {
                firmware: self.config.firmware,
            });
        }
    }

    fn reaction_step(&mut self, now: Instant, inputs: PeerInputs) {
        let Some(go_at) = self.go_at else {
            return;
        };
        if inputs.button_down && self.capture.is_armed() {
            self.capture.on_press(now);
        }
        if let Some(edge) = self.capture.take() {
            let result = ResultTime::from_elapsed(edge.saturating_duration_since(go_at));
            self.finish(result, GameMode::Reaction);
            self.haptic.start(now, self.config.haptic_reaction_done);
        } else if now.saturating_duration_since(go_at) >= self.config.reaction_timeout {
            self.capture.clear();
            self.report_timeout(GameMode::Reaction);
            self.finish(ResultTime::Penalty, GameMode::Reaction);
        }
    }

    fn shake_step(&mut self, now: Instant, inputs: PeerInputs) {
        let (Some(go_at), Some(round)) = (self.go_at, self.round) else {
            return;
        };
        if let Some(sample) = inputs.accel {
            if self.detector.update(sample) {
                let count = self.detector.count();
                trace!(stick = %self.config.id, count, target = round.param, "shake");
                self.send(MessageBody::ShakeProgress {
                    count,
                    target: round.param,
                });
                if count >= round.param {
                    let result = ResultTime::from_elapsed(now.saturating_duration_since(go_at));
                    self.finish(result, GameMode::Shake);
                    self.haptic.start(now, self.config.haptic_shake_done);
                    return;
                }
            }
        }
        if now.saturating_duration_since(go_at) >= self.config.shake_timeout {
            self.report_timeout(GameMode::Shake);
            self.finish(ResultTime::Penalty, GameMode::Shake);
        }
    }

    fn finish(&mut self, result: ResultTime, mode: GameMode) {
        info!(stick = %self.config.id, %result, ?mode, "result");
        self.last_result = Some(result);
        let body = match mode {
            GameMode::Reaction => MessageBody::ReactionResult(result),
            GameMode::Shake => MessageBody::ShakeResult(result),
        };
        self.send(body);
        self.set_state(PeerState::Done);
    }

    fn report_timeout(&self, mode: GameMode) {
        report_violation_to!(
            &self.violation_observer,
            device = self.config.id,
            ViolationSeverity::Warning,
            ViolationKind::Timing,
            "{:?} round timed out on {}",
            mode,
            self.config.id
        );
    }

    fn enter_idle(&mut self) {
        self.round = None;
        self.slot = None;
        self.join_sent = false;
        self.go_latched = None;
        self.go_at = None;
        self.capture.clear();
        self.detector.reset();
        self.set_state(PeerState::Idle);
    }

    fn set_state(&mut self, state: PeerState) {
        if self.state != state {
            debug!(stick = %self.config.id, from = %self.state, to = %state, "peer state");
            self.state = state;
        }
    }

    fn send(&mut self, body: MessageBody) {
        let message = Message::new(DeviceId::HOST, self.config.id, body);
        self.endpoint.send(&message);
    }
}

impl<T: Transport> std::fmt::Debug for PeerTimingUnit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerTimingUnit")
            .field("id", &self.config.id)
            .field("state", &self.state)
            .field("slot", &self.slot)
            .field("round", &self.round)
            .field("shakes", &self.detector.count())
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
    use crate::network::loopback::{LoopbackBus, LoopbackPort};
    use crate::network::messages::codes;
    use crate::telemetry::CollectingObserver;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    struct Bench {
        stick: PeerTimingUnit<LoopbackPort>,
        host: Endpoint<LoopbackPort>,
        observer: Arc<CollectingObserver>,
        start: Instant,
    }

    impl Bench {
        fn new() -> Self {
            let bus = LoopbackBus::new();
            let start = Instant::now();
            let observer = Arc::new(CollectingObserver::new());
            let stick = PeerTimingUnit::new(
                PeerConfig::new(DeviceId::STICK2),
                bus.port(DeviceId::STICK2),
                start,
            )
            .unwrap()
            .with_violation_observer(observer.clone());
            let host = Endpoint::new(DeviceId::HOST, bus.port(DeviceId::HOST));
            Self {
                stick,
                host,
                observer,
                start,
            }
        }

        fn command(&mut self, body: MessageBody) {
            self.host
                .send(&Message::new(DeviceId::STICK2, DeviceId::HOST, body));
        }

        fn at(&mut self, millis: u64, inputs: PeerInputs) {
            self.stick.poll(self.start + ms(millis), inputs);
        }

        fn outbox(&mut self) -> Vec<MessageBody> {
            self.host
                .poll_messages()
                .into_iter()
                .map(|message| {
                    assert_eq!(message.src, DeviceId::STICK2);
                    message.body
                })
                .collect()
        }

        fn start_round(&mut self, millis: u64, mode: GameMode, param: u8) {
            self.command(MessageBody::RoundStart { mode, param });
            self.at(millis, PeerInputs::default());
            assert_eq!(self.stick.state(), PeerState::WaitingGo);
        }
    }

    fn swing(bench: &mut Bench, millis: &mut u64) {
        for x in [9_000, 0] {
            *millis += 10;
            bench.at(*millis, PeerInputs::sample(AccelSample::new(x, 0, 16_384)));
        }
    }

    #[test]
    fn reliable_commands_are_acked() {
        let mut bench = Bench::new();
        bench.start_round(0, GameMode::Shake, 10);
        bench.command(MessageBody::CountdownTick { n: 3 });
        bench.at(5, PeerInputs::default());
        assert_eq!(
            bench.outbox(),
            vec![
                MessageBody::Ack {
                    acked: codes::ROUND_START
                },
                MessageBody::Ack {
                    acked: codes::COUNTDOWN_TICK
                },
            ]
        );
        assert!(bench.stick.haptic().is_active());
    }

    #[test]
    fn join_confirm_is_not_acked() {
        let mut bench = Bench::new();
        bench.command(MessageBody::JoinConfirm {
            slot: Slot::from_number(3).unwrap(),
        });
        bench.at(0, PeerInputs::default());
        assert!(bench.outbox().is_empty());
        assert_eq!(bench.stick.slot(), Slot::from_number(3));
        assert!(bench.stick.haptic().is_active());
    }

    #[test]
    fn held_button_sends_one_join_request() {
        let mut bench = Bench::new();
        bench.at(0, PeerInputs::button(true));
        bench.at(30, PeerInputs::button(true));
        assert!(bench.outbox().is_empty());
        bench.at(50, PeerInputs::button(true));
        bench.at(400, PeerInputs::button(true));
        let requests = bench.outbox();
        assert_eq!(requests.len(), 1);
        assert!(matches!(requests[0], MessageBody::JoinRequest { .. }));

        // release, press again
        bench.at(500, PeerInputs::button(false));
        bench.at(560, PeerInputs::button(false));
        bench.at(600, PeerInputs::button(true));
        bench.at(660, PeerInputs::button(true));
        assert_eq!(bench.outbox().len(), 1);
    }

    #[test]
    fn seated_controller_does_not_ask_again() {
        let mut bench = Bench::new();
        bench.command(MessageBody::JoinConfirm {
            slot: Slot::from_number(1).unwrap(),
        });
        bench.at(0, PeerInputs::button(true));
        bench.at(100, PeerInputs::button(true));
        assert!(bench.outbox().is_empty());
    }

    #[test]
    fn reaction_measured_from_go_to_edge() {
        let mut bench = Bench::new();
        bench.start_round(0, GameMode::Reaction, 0);
        bench.command(MessageBody::Go);
        bench.at(1000, PeerInputs::default());
        assert_eq!(bench.stick.state(), PeerState::TimingReaction);
        bench.outbox();

        bench
            .stick
            .capture()
            .on_press(bench.start + ms(1000) + Duration::from_micros(187_650));
        bench.at(1200, PeerInputs::button(true));
        assert_eq!(
            bench.outbox(),
            vec![MessageBody::ReactionResult(ResultTime::Millis(187))]
        );
        assert_eq!(bench.stick.state(), PeerState::Done);
    }

    #[test]
    fn polled_button_is_the_fallback_edge() {
        let mut bench = Bench::new();
        bench.start_round(0, GameMode::Reaction, 0);
        bench.command(MessageBody::Go);
        bench.at(1000, PeerInputs::default());
        bench.outbox();
        bench.at(1240, PeerInputs::button(true));
        assert_eq!(
            bench.outbox(),
            vec![MessageBody::ReactionResult(ResultTime::Millis(240))]
        );
    }

    #[test]
    fn button_held_at_go_is_penalized() {
        let mut bench = Bench::new();
        bench.start_round(0, GameMode::Reaction, 0);
        bench.command(MessageBody::Go);
        bench.at(1000, PeerInputs::button(true));
        let sent = bench.outbox();
        assert!(sent.contains(&MessageBody::ReactionResult(ResultTime::Penalty)));
        assert_eq!(bench.stick.state(), PeerState::Done);
        assert!(!bench.stick.capture().is_armed());
    }

    #[test]
    fn reaction_timeout_reports_penalty() {
        let mut bench = Bench::new();
        bench.start_round(0, GameMode::Reaction, 0);
        bench.command(MessageBody::Go);
        bench.at(1000, PeerInputs::default());
        bench.outbox();
        bench.at(10_999, PeerInputs::default());
        assert!(bench.outbox().is_empty());
        bench.at(11_000, PeerInputs::default());
        assert_eq!(
            bench.outbox(),
            vec![MessageBody::ReactionResult(ResultTime::Penalty)]
        );
        crate::assert_violation!(bench.observer, ViolationKind::Timing);
    }

    #[test]
    fn go_marker_haptic_counts_as_go() {
        let mut bench = Bench::new();
        bench.start_round(0, GameMode::Reaction, 0);
        bench.command(MessageBody::Haptic(HapticPulse::GoMarker));
        bench.at(50, PeerInputs::default());
        assert_eq!(bench.stick.state(), PeerState::TimingReaction);
    }

    #[test]
    fn go_outside_waiting_is_ignored() {
        let mut bench = Bench::new();
        bench.command(MessageBody::Go);
        bench.at(0, PeerInputs::default());
        assert_eq!(bench.stick.state(), PeerState::Idle);
        // still acked: the coordinator must stop retrying
        assert_eq!(
            bench.outbox(),
            vec![MessageBody::Ack { acked: codes::GO }]
        );
    }

    #[test]
    fn shake_counts_to_target() {
        let mut bench = Bench::new();
        bench.start_round(0, GameMode::Shake, 3);
        bench.command(MessageBody::Go);
        bench.at(1000, PeerInputs::sample(AccelSample::new(0, 0, 16_384)));
        assert_eq!(bench.stick.state(), PeerState::CountingShake);
        bench.outbox();

        let mut millis = 1000;
        for _ in 0..3 {
            swing(&mut bench, &mut millis);
        }
        let sent = bench.outbox();
        let progress: Vec<u8> = sent
            .iter()
            .filter_map(|body| match body {
                MessageBody::ShakeProgress { count, target: 3 } => Some(*count),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![1, 2, 3]);
        assert_eq!(
            sent.last(),
            Some(&MessageBody::ShakeResult(ResultTime::Millis(60)))
        );
        assert_eq!(bench.stick.state(), PeerState::Done);
    }

    #[test]
    fn shake_timeout_reports_penalty() {
        let mut bench = Bench::new();
        bench.start_round(0, GameMode::Shake, 10);
        bench.command(MessageBody::Go);
        bench.at(1000, PeerInputs::sample(AccelSample::new(0, 0, 16_384)));
        let mut millis = 1000;
        swing(&mut bench, &mut millis);
        bench.outbox();
        bench.at(31_000, PeerInputs::default());
        assert_eq!(
            bench.outbox(),
            vec![MessageBody::ShakeResult(ResultTime::Penalty)]
        );
        assert_eq!(bench.stick.shake_count(), 1);
    }

    #[test]
    fn return_to_idle_forgets_the_game() {
        let mut bench = Bench::new();
        bench.command(MessageBody::JoinConfirm {
            slot: Slot::from_number(2).unwrap(),
        });
        bench.start_round(0, GameMode::Reaction, 0);
        bench.command(MessageBody::Go);
        bench.at(100, PeerInputs::default());
        bench.command(MessageBody::ReturnToIdle);
        bench.at(200, PeerInputs::default());
        assert_eq!(bench.stick.state(), PeerState::Idle);
        assert_eq!(bench.stick.slot(), None);
        assert_eq!(bench.stick.mode(), None);
        assert!(!bench.stick.capture().is_armed());
    }

    #[test]
    fn next_round_start_rearms_after_done() {
        let mut bench = Bench::new();
        bench.start_round(0, GameMode::Reaction, 0);
        bench.command(MessageBody::Go);
        bench.at(100, PeerInputs::button(true));
        assert_eq!(bench.stick.state(), PeerState::Done);
        bench.start_round(5000, GameMode::Reaction, 0);
        assert_eq!(bench.stick.last_result(), None);
    }

    #[test]
    fn frames_from_other_devices_are_ignored() {
        let bus = LoopbackBus::new();
        let start = Instant::now();
        let observer = Arc::new(CollectingObserver::new());
        let mut stick = PeerTimingUnit::new(
            PeerConfig::new(DeviceId::STICK1),
            bus.port(DeviceId::STICK1),
            start,
        )
        .unwrap()
        .with_violation_observer(observer.clone());
        let mut rogue = Endpoint::new(DeviceId::STICK4, bus.port(DeviceId::STICK4));
        rogue.send(&Message::new(
            DeviceId::STICK1,
            DeviceId::STICK4,
            MessageBody::ReturnToIdle,
        ));
        stick.poll(start, PeerInputs::default());
        crate::assert_violation!(observer, ViolationKind::Protocol);
    }

    #[test]
    fn invalid_config_rejected() {
        let bus = LoopbackBus::new();
        let result = PeerTimingUnit::new(
            PeerConfig::new(DeviceId::DISPLAY),
            bus.port(DeviceId::DISPLAY),
            Instant::now(),
        );
        assert!(result.is_err());
    }
}
