//! A whole installation on one simulated link.
//!
//! The [`Arena`] owns a coordinator, four controllers and a display, all
//! attached to one [`LoopbackBus`] (optionally through [`ChaosTransport`]), and
//! a manual clock. Each [`Arena::step`] advances the clock by [`TICK`] and polls
//! every device once, coordinator first. Players are scripted per controller.

#![allow(dead_code)]

use std::sync::Arc;

use reflex_duel::network::loopback::LoopbackBus;
use reflex_duel::network::messages::GameMode;
use reflex_duel::peer::PeerInputs;
use reflex_duel::rng::{Pcg32, SeedableRng};
use reflex_duel::telemetry::CollectingObserver;
use reflex_duel::{
    AccelSample, ChaosConfig, ChaosTransport, DeviceId, DisplayUnit, GameConfig, GameEvent,
    GamePhase, Orchestrator, PeerConfig, PeerState, PeerTimingUnit, Slot, StateBoundary,
    TimingConfig, Transport,
};
use smallvec::smallvec;
use web_time::{Duration, Instant};

/// Clock step of the simulation.
pub const TICK: Duration = Duration::from_millis(10);

/// Link type shared by every device in an arena.
pub type Link = Box<dyn Transport>;

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

pub fn slot(n: u8) -> Slot {
    Slot::from_number(n).unwrap()
}

/// Reaction rounds only, 10 s pre-signal delay, short dwells.
pub fn reaction_game(rounds: u8) -> GameConfig {
    GameConfig {
        rounds,
        modes: smallvec![GameMode::Reaction],
        reaction_delays: smallvec![Duration::from_secs(10)],
        timing: TimingConfig::quick(),
        ..GameConfig::default()
    }
}

/// Shake rounds only with the given target, short dwells.
pub fn shake_game(rounds: u8, target: u8) -> GameConfig {
    GameConfig {
        rounds,
        modes: smallvec![GameMode::Shake],
        shake_targets: smallvec![target],
        timing: TimingConfig::quick(),
        ..GameConfig::default()
    }
}

/// What the person holding a controller does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Player {
    /// Never touches anything during a round.
    Sleeps,
    /// Presses exactly this long after the go.
    Reacts(Duration),
    /// Holds the button down before the go.
    Jumps,
    /// Swings rest, +peak, rest, -peak, each level held `hold` ticks.
    Shakes {
        /// Ticks per level.
        hold: u32,
    },
}

pub struct Arena {
    pub coordinator: Orchestrator<Link>,
    pub sticks: Vec<PeerTimingUnit<Link>>,
    pub display: DisplayUnit<Link>,
    pub players: [Player; 4],
    pub observer: Arc<CollectingObserver>,
    pub boundary: StateBoundary,
    pub events: Vec<GameEvent>,
    pub bus: LoopbackBus,
    start: Instant,
    now: Instant,
    held_until: [Option<Instant>; 4],
    shake_ticks: [u32; 4],
}

impl Arena {
    /// A lossless arena.
    pub fn new(config: GameConfig) -> Self {
        Self::build(config, |_, port| Box::new(port))
    }

    /// Every device talks through its own [`ChaosTransport`], seeded from
    /// `chaos.seed` plus the device address.
    pub fn lossy(config: GameConfig, chaos: ChaosConfig) -> Self {
        let base_seed = chaos.seed.unwrap_or(7);
        Self::build(config, move |id, port| {
            let device_chaos = ChaosConfig {
                seed: Some(base_seed + u64::from(id.as_u8())),
                ..chaos.clone()
            };
            Box::new(ChaosTransport::new(port, device_chaos))
        })
    }

    fn build<F>(config: GameConfig, mut link: F) -> Self
    where
        F: FnMut(DeviceId, reflex_duel::network::loopback::LoopbackPort) -> Link,
    {
        let bus = LoopbackBus::new();
        let observer = Arc::new(CollectingObserver::new());
        let boundary = StateBoundary::new();
        let start = Instant::now();

        let coordinator = Orchestrator::new(
            config,
            link(DeviceId::HOST, bus.port(DeviceId::HOST)),
            Pcg32::seed_from_u64(42),
        )
        .unwrap()
        .with_violation_observer(observer.clone())
        .with_boundary(boundary.clone());

        let sticks = DeviceId::CONTROLLERS
            .iter()
            .map(|id| {
                PeerTimingUnit::new(PeerConfig::new(*id), link(*id, bus.port(*id)), start)
                    .unwrap()
                    .with_violation_observer(observer.clone())
            })
            .collect();

        let display = DisplayUnit::new(link(DeviceId::DISPLAY, bus.port(DeviceId::DISPLAY)))
            .with_violation_observer(observer.clone());

        Self {
            coordinator,
            sticks,
            display,
            players: [Player::Sleeps; 4],
            observer,
            boundary,
            events: Vec::new(),
            bus,
            start,
            now: start,
            held_until: [None; 4],
            shake_ticks: [0; 4],
        }
    }

    /// Simulated time since the arena was built.
    pub fn elapsed(&self) -> Duration {
        self.now.saturating_duration_since(self.start)
    }

    pub fn phase(&self) -> GamePhase {
        self.coordinator.phase()
    }

    pub fn stick(&self, number: u8) -> &PeerTimingUnit<Link> {
        &self.sticks[usize::from(number - 1)]
    }

    /// Holds controller `number`'s button for 200 ms from now.
    pub fn press(&mut self, number: u8) {
        self.held_until[usize::from(number - 1)] = Some(self.now + ms(200));
    }

    /// Advances the clock one tick and polls every device.
    pub fn step(&mut self) {
        self.now += TICK;
        self.coordinator.poll(self.now);
        self.events.extend(self.coordinator.events());
        // keep the renderer side drained like a real one would
        let _ = self.boundary.take_commands(ms(1));

        for index in 0..self.sticks.len() {
            let inputs = self.inputs_for(index);
            self.sticks[index].poll(self.now, inputs);
        }
        self.display.poll();
    }

    /// Steps until `done` holds or `limit` of simulated time passes. Returns
    /// whether `done` was reached.
    pub fn run_until<F>(&mut self, limit: Duration, mut done: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        let deadline = self.now + limit;
        while self.now < deadline {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    /// Steps for `duration` unconditionally.
    pub fn run_for(&mut self, duration: Duration) {
        let deadline = self.now + duration;
        while self.now < deadline {
            self.step();
        }
    }

    /// Waits for the prompt, then seats controllers `numbers` in order, pressing
    /// again whenever a request goes unanswered. Returns once the game has
    /// left Joining.
    pub fn seat(&mut self, numbers: &[u8]) {
        assert!(
            self.run_until(ms(5000), |arena| arena.phase() == GamePhase::Joining),
            "never reached joining"
        );
        for number in numbers {
            let controller = DeviceId::stick(*number).unwrap();
            let mut attempts = 0;
            while self.coordinator.roster().slot_of(controller).is_none() {
                attempts += 1;
                assert!(attempts < 50, "stick {number} could not join");
                self.press(*number);
                let coordinator_sees = |arena: &Self| {
                    arena.coordinator.roster().slot_of(controller).is_some()
                };
                self.run_until(ms(400), coordinator_sees);
            }
        }
        assert!(
            self.run_until(ms(20_000), |arena| arena.phase() != GamePhase::Joining),
            "joining never completed"
        );
    }

    pub fn saw<F>(&self, predicate: F) -> bool
    where
        F: Fn(&GameEvent) -> bool,
    {
        self.events.iter().any(predicate)
    }

    fn inputs_for(&mut self, index: usize) -> PeerInputs {
        let state = self.sticks[index].state();
        let mut button_down = self.held_until[index].is_some_and(|until| self.now < until);
        let mut accel = None;

        match self.players[index] {
            Player::Sleeps => {},
            Player::Reacts(after) => {
                let stick = &self.sticks[index];
                if let (PeerState::TimingReaction, Some(go)) = (state, stick.go_time()) {
                    if self.now >= go + after {
                        stick.capture().on_press(go + after);
                        button_down = true;
                    }
                }
            },
            Player::Jumps => {
                if matches!(state, PeerState::WaitingGo | PeerState::TimingReaction) {
                    button_down = true;
                }
            },
            Player::Shakes { hold } => {
                if state == PeerState::CountingShake {
                    let level = self.shake_ticks[index] / hold.max(1);
                    let x = match level % 4 {
                        1 => 9_000,
                        3 => -9_000,
                        _ => 0,
                    };
                    accel = Some(AccelSample::new(x, 0, 16_384));
                    self.shake_ticks[index] += 1;
                } else {
                    self.shake_ticks[index] = 0;
                }
            },
        }
        PeerInputs { button_down, accel }
    }
}
