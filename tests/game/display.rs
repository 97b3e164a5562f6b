//! What the status display shows over a game.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{ms, reaction_game, shake_game, slot, Arena, Player};
use reflex_duel::display::Screen;
use reflex_duel::{DeviceId, GameEvent, GamePhase, ZoneColor};
use web_time::Duration;

#[test]
fn join_screen_tracks_prompts_and_seated_players() {
    let mut arena = Arena::new(reaction_game(1));
    assert!(arena.run_until(ms(2000), |arena| arena.phase() == GamePhase::Joining));
    assert_eq!(arena.display.model().screen, Screen::Prompt);
    assert_eq!(arena.display.model().prompt_slot, Some(slot(1)));

    arena.press(3);
    assert!(arena.run_until(ms(400), |arena| {
        arena.display.model().prompt_slot == Some(slot(2))
    }));
    let ready = arena.display.model().ready[0].unwrap();
    assert_eq!(ready.controller, DeviceId::STICK3);
    assert_eq!(ready.color, ZoneColor::identity(DeviceId::STICK3));
    assert!(arena.display.model().ready[1].is_none());
    assert!(arena.display.stats().acks_sent >= 3);
}

#[test]
fn shake_round_shows_target_then_countdown() {
    let mut arena = Arena::new(shake_game(1, 15));
    arena.seat(&[1, 2]);
    assert!(arena.run_until(ms(1000), |arena| {
        arena.display.model().screen == Screen::Shake
    }));
    assert_eq!(arena.display.model().shake_target, Some(15));

    let mut seen = Vec::new();
    arena.run_until(ms(3000), |arena| {
        if let Some(n) = arena.display.model().countdown {
            if seen.last() != Some(&n) {
                seen.push(n);
            }
        }
        arena.display.model().screen == Screen::Go
    });
    assert_eq!(seen, vec![3, 2, 1]);
    assert_eq!(arena.display.model().screen, Screen::Go);
    assert_eq!(arena.display.model().countdown, None);
}

#[test]
fn final_screen_names_the_winner_until_idle() {
    let mut arena = Arena::new(reaction_game(1));
    arena.players[0] = Player::Reacts(ms(180));
    arena.players[1] = Player::Reacts(ms(240));
    arena.seat(&[1, 2]);

    assert!(arena.run_until(Duration::from_secs(30), |arena| {
        arena.saw(|event| matches!(event, GameEvent::GameOver { .. }))
    }));
    let model = arena.display.model();
    assert_eq!(model.screen, Screen::FinalWinner);
    assert_eq!(model.winner, Some(slot(1)));
    assert_eq!(model.scores[0], Some(1));
    assert_eq!(model.scores[1], Some(0));

    let before = arena.display.revision();
    assert!(arena.run_until(ms(3000), |arena| arena.phase() == GamePhase::Idle));
    arena.step();
    assert!(arena.display.revision() > before);
    assert_eq!(arena.display.model().screen, Screen::Idle);
    assert_eq!(arena.display.model().winner, None);
    assert!(arena.display.model().ready.iter().all(Option::is_none));
}

#[test]
fn skip_from_final_returns_to_idle_early() {
    let mut arena = Arena::new(reaction_game(1));
    arena.players[0] = Player::Reacts(ms(180));
    arena.players[1] = Player::Reacts(ms(240));
    arena.seat(&[1, 2]);
    assert!(arena.run_until(Duration::from_secs(30), |arena| {
        arena.phase() == GamePhase::Final
    }));

    arena.display.request_skip();
    arena.step();
    arena.step();
    assert_eq!(arena.phase(), GamePhase::Idle);
    assert_eq!(arena.display.model().screen, Screen::Idle);
}
