//! Complete games from the first prompt back to idle.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{ms, reaction_game, shake_game, slot, Arena, Player};
use reflex_duel::display::Screen;
use reflex_duel::orchestrator::selection::RoundConfig;
use reflex_duel::telemetry::ViolationKind;
use reflex_duel::{GameEvent, GamePhase, PeerState, ResultTime};
use web_time::Duration;

fn round_finished(arena: &Arena, round: u8) -> bool {
    arena.saw(|event| matches!(event, GameEvent::RoundFinished { round: r, .. } if *r == round))
}

fn game_over(arena: &Arena) -> bool {
    arena.saw(|event| matches!(event, GameEvent::GameOver { .. }))
}

#[test]
fn fastest_clean_press_wins_the_reaction_round() {
    let mut arena = Arena::new(reaction_game(1));
    arena.players = [
        Player::Reacts(ms(120)),
        Player::Jumps,
        Player::Reacts(ms(95)),
        Player::Sleeps,
    ];
    arena.seat(&[1, 2, 3]);

    assert!(arena.run_until(Duration::from_secs(30), |arena| round_finished(arena, 1)));

    let roster = arena.coordinator.roster();
    assert_eq!(roster.get(slot(1)).result, Some(ResultTime::Millis(120)));
    assert_eq!(roster.get(slot(2)).result, Some(ResultTime::Penalty));
    assert_eq!(roster.get(slot(3)).result, Some(ResultTime::Millis(95)));
    assert!(!roster.get(slot(4)).joined);
    let scores: Vec<u8> = [1, 2, 3].map(|n| roster.get(slot(n)).score).to_vec();
    assert_eq!(scores, vec![0, 0, 1]);

    assert!(arena.saw(|event| *event
        == GameEvent::RoundFinished {
            round: 1,
            winner: Some(slot(3)),
        }));

    let model = arena.display.model();
    assert_eq!(model.screen, Screen::RoundWinner);
    assert_eq!(model.winner, Some(slot(3)));
    assert_eq!(model.times[0], Some(ResultTime::Millis(120)));
    assert_eq!(model.times[1], Some(ResultTime::Penalty));
    assert_eq!(model.times[2], Some(ResultTime::Millis(95)));
    assert_eq!(model.times[3], None);
    assert_eq!(model.scores[2], Some(1));

    reflex_duel::assert_no_violations!(arena.observer);
}

#[test]
fn game_ends_with_a_winner_and_returns_to_idle() {
    let mut arena = Arena::new(reaction_game(2));
    arena.players = [
        Player::Reacts(ms(200)),
        Player::Reacts(ms(150)),
        Player::Sleeps,
        Player::Sleeps,
    ];
    arena.seat(&[1, 2]);

    assert!(arena.run_until(Duration::from_secs(60), game_over));
    assert!(arena.saw(|event| *event
        == GameEvent::GameOver {
            winner: Some(slot(2)),
        }));
    assert_eq!(arena.phase(), GamePhase::Final);
    assert_eq!(arena.display.model().screen, Screen::FinalWinner);
    assert_eq!(arena.coordinator.roster().get(slot(2)).score, 2);

    assert!(arena.run_until(ms(5000), |arena| arena.phase() == GamePhase::Idle));
    arena.run_for(ms(50));
    assert_eq!(arena.coordinator.round(), 0);
    assert!(!arena.coordinator.roster().get(slot(1)).joined);
    for stick in &arena.sticks {
        assert_eq!(stick.state(), PeerState::Idle);
        assert_eq!(stick.slot(), None);
    }
    assert_eq!(arena.display.model().screen, Screen::Idle);
    reflex_duel::assert_no_violations!(arena.observer);
}

#[test]
fn more_shakes_per_second_wins_the_shake_round() {
    let mut arena = Arena::new(shake_game(1, 10));
    arena.players = [
        Player::Shakes { hold: 1 },
        Player::Shakes { hold: 2 },
        Player::Sleeps,
        Player::Sleeps,
    ];
    arena.seat(&[1, 2]);

    assert!(arena.run_until(Duration::from_secs(30), |arena| round_finished(arena, 1)));

    assert!(arena.saw(|event| matches!(
        event,
        GameEvent::RoundStarted {
            round: 1,
            config: RoundConfig::Shake { target: 10 },
        }
    )));
    let roster = arena.coordinator.roster();
    assert_eq!(roster.get(slot(1)).result, Some(ResultTime::Millis(210)));
    assert_eq!(roster.get(slot(2)).result, Some(ResultTime::Millis(410)));
    assert_eq!(roster.get(slot(1)).shake_progress, 10);
    assert_eq!(arena.stick(1).shake_count(), 10);
    assert!(arena.saw(|event| *event
        == GameEvent::RoundFinished {
            round: 1,
            winner: Some(slot(1)),
        }));
}

#[test]
fn silent_controller_is_penalized_after_the_grace_window() {
    let mut arena = Arena::new(reaction_game(1));
    arena.players = [
        Player::Reacts(ms(300)),
        Player::Sleeps,
        Player::Sleeps,
        Player::Sleeps,
    ];
    arena.seat(&[1, 2]);
    // A controller that is switched off after joining.
    arena.sticks.truncate(1);

    assert!(arena.run_until(Duration::from_secs(40), |arena| round_finished(arena, 1)));
    let roster = arena.coordinator.roster();
    assert_eq!(roster.get(slot(1)).result, Some(ResultTime::Millis(300)));
    assert_eq!(roster.get(slot(2)).result, Some(ResultTime::Penalty));
    assert!(arena.saw(|event| *event
        == GameEvent::ResultRecorded {
            slot: slot(2),
            result: ResultTime::Penalty,
        }));
    // Its reliable commands ran out of retries.
    assert!(arena.coordinator.delivery_stats().dropped > 0);
    reflex_duel::assert_violation!(arena.observer, ViolationKind::Delivery);
}

#[test]
fn level_scores_go_to_sudden_death_and_bench_the_rest() {
    let mut arena = Arena::new(reaction_game(2));
    arena.players = [
        Player::Reacts(ms(100)),
        Player::Reacts(ms(200)),
        Player::Reacts(ms(500)),
        Player::Sleeps,
    ];
    arena.seat(&[1, 2, 3]);

    assert!(arena.run_until(Duration::from_secs(30), |arena| round_finished(arena, 1)));
    arena.players[0] = Player::Reacts(ms(300));
    arena.players[1] = Player::Reacts(ms(100));

    assert!(arena.run_until(Duration::from_secs(30), |arena| {
        arena.saw(|event| matches!(event, GameEvent::TieBreakStarted { .. }))
    }));
    assert!(arena.saw(|event| *event
        == GameEvent::TieBreakStarted {
            first: slot(1),
            second: slot(2),
        }));
    arena.run_for(ms(100));
    assert_eq!(arena.stick(3).state(), PeerState::Idle);

    assert!(arena.run_until(Duration::from_secs(60), game_over));
    assert!(arena.saw(|event| *event
        == GameEvent::GameOver {
            winner: Some(slot(2)),
        }));
    let roster = arena.coordinator.roster();
    assert_eq!(roster.get(slot(1)).score, 1);
    assert_eq!(roster.get(slot(2)).score, 3);
    assert_eq!(roster.get(slot(3)).score, 0);
    // The benched controller never saw a tie-break round.
    assert_eq!(roster.get(slot(3)).result, None);
    assert_eq!(arena.coordinator.round(), 4);
}
