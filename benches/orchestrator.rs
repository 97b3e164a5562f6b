//! Benchmarks for the coordinator game loop
//!
//! Run with: cargo bench --bench orchestrator
//!
//! Measures one `poll` in a quiet phase, one `poll` with a full inbox, and a
//! whole one-round game between two simulated controllers on the loopback bus.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use reflex_duel::network::loopback::{LoopbackBus, LoopbackPort};
use reflex_duel::network::messages::{GameMode, Message, MessageBody};
use reflex_duel::peer::PeerInputs;
use reflex_duel::rng::{Pcg32, SeedableRng};
use reflex_duel::{
    DeviceId, GameConfig, GameEvent, GamePhase, Orchestrator, PeerConfig, PeerState,
    PeerTimingUnit, StateBoundary, TimingConfig, Transport,
};
use smallvec::smallvec;
use std::hint::black_box;
use web_time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(10);

fn config() -> GameConfig {
    GameConfig {
        rounds: 1,
        modes: smallvec![GameMode::Reaction],
        reaction_delays: smallvec![Duration::from_millis(500)],
        timing: TimingConfig::quick(),
        ..GameConfig::default()
    }
}

fn coordinator(bus: &LoopbackBus) -> Orchestrator<LoopbackPort> {
    Orchestrator::new(config(), bus.port(DeviceId::HOST), Pcg32::seed_from_u64(1))
        .unwrap_or_else(|err| panic!("bench config rejected: {err}"))
}

fn bench_idle_poll(c: &mut Criterion) {
    let bus = LoopbackBus::new();
    let mut orchestrator = coordinator(&bus);
    let published_bus = LoopbackBus::new();
    let boundary = StateBoundary::new();
    let mut orchestrator_with_boundary =
        coordinator(&published_bus).with_boundary(boundary.clone());
    let start = Instant::now();
    orchestrator.poll(start);
    orchestrator_with_boundary.poll(start);

    let mut group = c.benchmark_group("poll");
    group.bench_function("idle", |b| {
        b.iter(|| orchestrator.poll(black_box(start + TICK)))
    });
    group.bench_function("idle_published", |b| {
        b.iter(|| {
            orchestrator_with_boundary.poll(black_box(start + TICK));
            boundary.take_commands(Duration::from_millis(1))
        })
    });
    group.finish();
}

fn bench_busy_poll(c: &mut Criterion) {
    c.bench_function("poll/inbox_of_32", |b| {
        b.iter_batched(
            || {
                let bus = LoopbackBus::new();
                let mut orchestrator = coordinator(&bus);
                orchestrator.poll(Instant::now());
                let mut stick = bus.port(DeviceId::STICK1);
                for _ in 0..32 {
                    let ack = Message::new(
                        DeviceId::HOST,
                        DeviceId::STICK1,
                        MessageBody::Ack { acked: 0x21 },
                    );
                    stick.send_to(&ack.to_bytes(), DeviceId::HOST);
                }
                orchestrator
            },
            |mut orchestrator| orchestrator.poll(Instant::now()),
            BatchSize::SmallInput,
        )
    });
}

/// Runs a whole game: two controllers join, one round, back to idle.
fn play_one_game() -> usize {
    let bus = LoopbackBus::new();
    let start = Instant::now();
    let mut orchestrator = coordinator(&bus);
    let mut sticks: Vec<_> = [DeviceId::STICK1, DeviceId::STICK2]
        .into_iter()
        .filter_map(|id| PeerTimingUnit::new(PeerConfig::new(id), bus.port(id), start).ok())
        .collect();

    let mut events = 0;
    let mut now = start;
    let mut game_over = false;
    for step in 0..2_000_u32 {
        now += TICK;
        orchestrator.poll(now);
        for event in orchestrator.events() {
            events += 1;
            game_over |= matches!(event, GameEvent::GameOver { .. });
        }
        if game_over && orchestrator.phase() == GamePhase::Idle {
            break;
        }
        for (index, stick) in sticks.iter_mut().enumerate() {
            // Each controller presses in its own join window, and 100 ms after go.
            let joining = orchestrator.phase() == GamePhase::Joining
                && orchestrator.roster().joined_count() == index
                && step % 20 < 10;
            let reacting = stick.state() == PeerState::TimingReaction
                && stick.go_time().is_some_and(|go| now >= go + Duration::from_millis(100));
            stick.poll(now, PeerInputs::button(joining || reacting));
        }
    }
    events
}

fn bench_full_game(c: &mut Criterion) {
    c.bench_function("game/one_round_two_players", |b| b.iter(play_one_game));
}

criterion_group!(benches, bench_idle_poll, bench_busy_poll, bench_full_game);
criterion_main!(benches);
