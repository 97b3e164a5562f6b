//! Headless simulation of a whole installation.
//!
//! Runs a coordinator, four controllers and the display on one in-memory link,
//! optionally through fault injection, with randomly behaving players. Each
//! game is driven by a simulated clock, so a run with a given `--seed` is
//! exactly reproducible and far faster than real time.
//!
//! # Usage
//!
//! ```bash
//! # Three players, five-round games, clean link
//! cargo run -p duel-sim -- --players 3 --rounds 5
//!
//! # Ten games on a hostile radio, with debug logs
//! cargo run -p duel-sim -- --games 10 --chaos hostile --seed 42 --verbose
//! ```
//!
//! # Output
//!
//! One JSON line per game, then a summary line:
//! ```json
//! {"game":1,"winner":2,"rounds":5,"sim_ms":71230,"retransmissions":3,"dropped":0,"violations":0}
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use reflex_duel::network::loopback::LoopbackBus;
use reflex_duel::peer::PeerInputs;
use reflex_duel::rng::{Pcg32, Rng, SeedableRng};
use reflex_duel::telemetry::{CollectingObserver, CompositeObserver, TracingObserver};
use reflex_duel::{
    AccelSample, ChaosConfig, ChaosTransport, DeliveryConfig, DeviceId, DisplayUnit, GameConfig,
    GameEvent, GamePhase, Orchestrator, PeerConfig, PeerState, PeerTimingUnit, TimingConfig,
    Transport,
};
use serde::Serialize;
use web_time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(10);

/// Simulated time after which a game counts as stuck.
const GAME_LIMIT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Chaos {
    /// Lossless link.
    None,
    /// Some loss, the odd duplicate and damaged frame.
    Noisy,
    /// Heavy loss, corruption, garbage and bursts.
    Hostile,
}

#[derive(Debug, Parser)]
#[command(about = "Simulate reflex-duel games end to end")]
struct Opt {
    /// Controllers that join each game (2 to 4).
    #[arg(short, long, default_value_t = 2)]
    players: u8,
    /// Regular rounds per game.
    #[arg(short, long, default_value_t = 3)]
    rounds: u8,
    /// Games to play back to back.
    #[arg(short, long, default_value_t = 1)]
    games: u32,
    /// Link fault profile.
    #[arg(long, value_enum, default_value_t = Chaos::None)]
    chaos: Chaos,
    /// Seed for the coordinator, the players and the link.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Use the full-length production timings instead of short ones.
    #[arg(long)]
    real_timing: bool,
    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct GameReport {
    game: u32,
    winner: Option<u8>,
    rounds: u8,
    sim_ms: u128,
    retransmissions: u64,
    dropped: u64,
    violations: usize,
}

#[derive(Debug, Serialize)]
struct Summary {
    games: u32,
    finished: u32,
    wins: [u32; 4],
}

type Link = Box<dyn Transport>;

/// One controller and the person holding it.
struct Player {
    stick: PeerTimingUnit<Link>,
    /// Reaction time this player will show in the current round.
    reflex: Duration,
    /// Ticks per accelerometer level while shaking.
    swing: u32,
    shake_ticks: u32,
    jumps: bool,
}

impl Player {
    fn inputs(&mut self, now: Instant, want_join: bool) -> PeerInputs {
        match self.stick.state() {
            PeerState::Idle => PeerInputs::button(want_join),
            PeerState::WaitingGo => PeerInputs::button(self.jumps),
            PeerState::TimingReaction => {
                let pressed = self
                    .stick
                    .go_time()
                    .is_some_and(|go| now >= go + self.reflex);
                PeerInputs::button(pressed)
            },
            PeerState::CountingShake => {
                let level = self.shake_ticks / self.swing;
                self.shake_ticks += 1;
                let x = match level % 4 {
                    1 => 9_000,
                    3 => -9_000,
                    _ => 0,
                };
                PeerInputs::sample(AccelSample::new(x, 0, 16_384))
            },
            PeerState::Done => {
                self.shake_ticks = 0;
                PeerInputs::default()
            },
        }
    }

    /// Draws this player's behaviour for the next round.
    fn reroll(&mut self, rng: &mut Pcg32) {
        self.reflex = Duration::from_millis(u64::from(rng.gen_range(140..420)));
        self.swing = rng.gen_range(1..4);
        self.jumps = rng.gen_bool(0.05);
        self.shake_ticks = 0;
    }
}

fn chaos_config(chaos: Chaos, seed: u64) -> Option<ChaosConfig> {
    let base = match chaos {
        Chaos::None => return None,
        Chaos::Noisy => ChaosConfig::noisy_radio(),
        Chaos::Hostile => ChaosConfig::hostile_radio(),
    };
    Some(ChaosConfig {
        seed: Some(seed),
        ..base
    })
}

fn link(bus: &LoopbackBus, id: DeviceId, chaos: Option<&ChaosConfig>) -> Link {
    let port = bus.port(id);
    match chaos {
        Some(config) => {
            let seeded = ChaosConfig {
                seed: config.seed.map(|seed| seed ^ u64::from(id.as_u8()) << 32),
                ..config.clone()
            };
            Box::new(ChaosTransport::new(port, seeded))
        },
        None => Box::new(port),
    }
}

fn play(opt: &Opt, game: u32) -> Result<GameReport, String> {
    let seed = opt.seed.wrapping_add(u64::from(game));
    let chaos = chaos_config(opt.chaos, seed);
    let bus = LoopbackBus::new();
    let collector = Arc::new(CollectingObserver::new());
    let mut observers = CompositeObserver::new();
    observers.add(collector.clone());
    observers.add(Arc::new(TracingObserver));
    let observers = Arc::new(observers);

    let config = GameConfig {
        rounds: opt.rounds,
        timing: if opt.real_timing {
            TimingConfig::default()
        } else {
            TimingConfig::quick()
        },
        delivery: if chaos.is_some() {
            DeliveryConfig::lossy()
        } else {
            DeliveryConfig::default()
        },
        ..GameConfig::default()
    };
    let mut coordinator = Orchestrator::new(
        config,
        link(&bus, DeviceId::HOST, chaos.as_ref()),
        Pcg32::seed_from_u64(seed),
    )
    .map_err(|err| err.to_string())?
    .with_violation_observer(observers.clone());

    let start = Instant::now();
    let mut players = Vec::new();
    for id in DeviceId::CONTROLLERS {
        let stick = PeerTimingUnit::new(PeerConfig::new(id), link(&bus, id, chaos.as_ref()), start)
            .map_err(|err| err.to_string())?
            .with_violation_observer(observers.clone());
        players.push(Player {
            stick,
            reflex: Duration::from_millis(250),
            swing: 1,
            shake_ticks: 0,
            jumps: false,
        });
    }
    let mut display = DisplayUnit::new(link(&bus, DeviceId::DISPLAY, chaos.as_ref()))
        .with_violation_observer(observers.clone());

    let mut rng = Pcg32::seed_from_u64(seed ^ 0x5EED);
    let joining = usize::from(opt.players.clamp(2, 4));
    let mut now = start;
    let mut winner = None;
    let mut over = false;

    while now.saturating_duration_since(start) < GAME_LIMIT {
        now += TICK;
        coordinator.poll(now);
        for event in coordinator.events() {
            match event {
                GameEvent::RoundStarted { .. } => {
                    for player in &mut players {
                        player.reroll(&mut rng);
                    }
                },
                GameEvent::GameOver { winner: slot } => {
                    winner = slot.map(|slot| slot.number());
                    over = true;
                },
                _ => {},
            }
        }
        if over && coordinator.phase() == GamePhase::Idle {
            break;
        }
        let seated = coordinator.roster().joined_count();
        let blink = now.saturating_duration_since(start).as_millis() % 400 < 200;
        for (index, player) in players.iter_mut().enumerate() {
            // Players join one after another, each pressing until seated.
            let want_join = coordinator.phase() == GamePhase::Joining
                && index < joining
                && index == seated
                && blink;
            let inputs = player.inputs(now, want_join);
            player.stick.poll(now, inputs);
        }
        display.poll();
    }

    if !over {
        return Err(format!(
            "game {game} stuck in {} after {:?}",
            coordinator.phase(),
            GAME_LIMIT
        ));
    }
    let stats = coordinator.delivery_stats();
    Ok(GameReport {
        game,
        winner,
        rounds: coordinator.config().rounds,
        sim_ms: now.saturating_duration_since(start).as_millis(),
        retransmissions: stats.retransmissions,
        dropped: stats.dropped,
        violations: collector.len(),
    })
}

fn main() -> ExitCode {
    let opt = Opt::parse();

    let level = if opt.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    if let Err(err) = tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .finish(),
    ) {
        eprintln!("setting up tracing subscriber failed: {err}");
        return ExitCode::FAILURE;
    }

    let mut summary = Summary {
        games: opt.games,
        finished: 0,
        wins: [0; 4],
    };
    for game in 1..=opt.games {
        match play(&opt, game) {
            Ok(report) => {
                summary.finished += 1;
                if let Some(slot) = report.winner {
                    summary.wins[usize::from(slot - 1)] += 1;
                }
                match serde_json::to_string(&report) {
                    Ok(line) => println!("{line}"),
                    Err(err) => eprintln!("report not serializable: {err}"),
                }
            },
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            },
        }
    }
    match serde_json::to_string(&summary) {
        Ok(line) => println!("{line}"),
        Err(err) => eprintln!("summary not serializable: {err}"),
    }
    ExitCode::SUCCESS
}
