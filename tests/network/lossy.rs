//! Whole games over a misbehaving radio.
//!
//! Every device gets its own seeded [`ChaosTransport`](reflex_duel::ChaosTransport),
//! so a failure here replays exactly.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{ms, reaction_game, shake_game, Arena, Player};
use reflex_duel::{ChaosConfig, DeliveryConfig, GameConfig, GameEvent, GamePhase};
use web_time::Duration;

fn game_over(arena: &Arena) -> bool {
    arena.saw(|event| matches!(event, GameEvent::GameOver { .. }))
}

fn lossy(config: GameConfig) -> GameConfig {
    GameConfig {
        tie_break: false,
        delivery: DeliveryConfig::lossy(),
        ..config
    }
}

#[test]
fn reaction_game_finishes_on_a_noisy_radio() {
    for seed in [1_u64, 17, 99] {
        let chaos = ChaosConfig {
            seed: Some(seed),
            ..ChaosConfig::noisy_radio()
        };
        let mut arena = Arena::lossy(lossy(reaction_game(2)), chaos);
        arena.players = [
            Player::Reacts(ms(150)),
            Player::Reacts(ms(230)),
            Player::Sleeps,
            Player::Sleeps,
        ];
        arena.seat(&[1, 2]);

        assert!(
            arena.run_until(Duration::from_secs(90), game_over),
            "seed {seed}: game stuck in {}",
            arena.phase()
        );
        let stats = arena.coordinator.delivery_stats();
        assert!(stats.retransmissions > 0, "seed {seed}: {stats:?}");
        assert!(
            arena.run_until(ms(5000), |arena| arena.phase() == GamePhase::Idle),
            "seed {seed}: final never ended"
        );
    }
}

#[test]
fn shake_game_finishes_on_a_hostile_radio() {
    let chaos = ChaosConfig {
        seed: Some(2024),
        ..ChaosConfig::hostile_radio()
    };
    let mut arena = Arena::lossy(lossy(shake_game(2, 10)), chaos);
    arena.players = [
        Player::Shakes { hold: 1 },
        Player::Shakes { hold: 2 },
        Player::Sleeps,
        Player::Sleeps,
    ];
    arena.seat(&[1, 2]);

    assert!(arena.run_until(Duration::from_secs(90), game_over));
    let finished = arena
        .events
        .iter()
        .filter(|event| matches!(event, GameEvent::RoundFinished { .. }))
        .count();
    assert_eq!(finished, 2);
    // Damaged frames were caught by the checksum, not acted on.
    let decoder = arena.coordinator.endpoint().decoder_stats();
    assert!(decoder.checksum_failures > 0 || decoder.bytes_skipped > 0);
}

#[test]
fn lossless_link_never_retransmits() {
    let mut arena = Arena::lossy(reaction_game(1), ChaosConfig::passthrough());
    arena.players = [
        Player::Reacts(ms(150)),
        Player::Reacts(ms(230)),
        Player::Sleeps,
        Player::Sleeps,
    ];
    arena.seat(&[1, 2]);
    assert!(arena.run_until(Duration::from_secs(30), game_over));

    let stats = arena.coordinator.delivery_stats();
    assert_eq!(stats.retransmissions, 0);
    assert_eq!(stats.dropped, 0);
    assert!(stats.acks_matched > 0);
    reflex_duel::assert_no_violations!(arena.observer);
}
