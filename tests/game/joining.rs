//! Slot claiming and the join prompt cycle.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{ms, reaction_game, shake_game, slot, Arena};
use reflex_duel::{DeviceId, GameEvent, GamePhase, Slot};
use web_time::Duration;

fn prompting(arena: &Arena) -> Option<Slot> {
    arena.coordinator.render_snapshot().prompt_slot
}

#[test]
fn press_claims_the_prompted_slot() {
    let mut arena = Arena::new(reaction_game(1));
    assert!(arena.run_until(ms(2000), |arena| prompting(arena) == Some(slot(1))));

    // Controller 4 answers the first prompt.
    arena.press(4);
    assert!(arena.run_until(ms(400), |arena| prompting(arena) == Some(slot(2))));

    let roster = arena.coordinator.roster();
    assert_eq!(roster.slot_of(DeviceId::STICK4), Some(slot(1)));
    assert_eq!(roster.get(slot(1)).controller, Some(DeviceId::STICK4));
    assert_eq!(arena.stick(4).slot(), Some(slot(1)));
    assert_eq!(
        arena.events,
        vec![GameEvent::PlayerJoined {
            slot: slot(1),
            controller: DeviceId::STICK4,
        }]
    );
}

#[test]
fn unanswered_prompt_moves_on_and_two_players_start_the_game() {
    let mut arena = Arena::new(shake_game(1, 10));
    assert!(arena.run_until(ms(2000), |arena| prompting(arena) == Some(slot(1))));
    arena.press(1);
    assert!(arena.run_until(ms(400), |arena| prompting(arena) == Some(slot(2))));

    // Nobody answers slot 2.
    assert!(arena.run_until(ms(2000), |arena| prompting(arena) == Some(slot(3))));
    arena.press(3);
    assert!(arena.run_until(ms(400), |arena| prompting(arena) == Some(slot(4))));

    // Slot 4 times out and the two seated players are enough.
    assert!(arena.run_until(ms(3000), |arena| arena.phase() != GamePhase::Joining));
    assert_eq!(arena.phase(), GamePhase::Countdown);

    let roster = arena.coordinator.roster();
    assert_eq!(roster.joined_count(), 2);
    assert!(roster.get(slot(1)).joined);
    assert!(!roster.get(slot(2)).joined);
    assert_eq!(roster.slot_of(DeviceId::STICK3), Some(slot(3)));
    assert!(arena.saw(|event| matches!(event, GameEvent::RoundStarted { round: 1, .. })));
}

#[test]
fn lone_player_keeps_the_prompts_cycling() {
    let mut arena = Arena::new(reaction_game(1));
    assert!(arena.run_until(ms(2000), |arena| prompting(arena) == Some(slot(1))));
    arena.press(2);
    assert!(arena.run_until(ms(400), |arena| prompting(arena) == Some(slot(2))));

    // Slots 3 and 4 time out, then slot 2 comes round again.
    let mut prompts = vec![slot(2)];
    let deadline = arena.elapsed() + Duration::from_secs(6);
    while arena.elapsed() < deadline {
        arena.step();
        let current = prompting(&arena);
        if current != prompts.last().copied() {
            prompts.extend(current);
        }
    }

    assert_eq!(arena.phase(), GamePhase::Joining);
    assert_eq!(&prompts[..4], &[slot(2), slot(3), slot(4), slot(2)]);
    assert!(!arena.saw(|event| matches!(event, GameEvent::RoundStarted { .. })));
}

#[test]
fn seated_controller_cannot_claim_a_second_slot() {
    let mut arena = Arena::new(reaction_game(1));
    assert!(arena.run_until(ms(2000), |arena| prompting(arena) == Some(slot(1))));
    arena.press(1);
    assert!(arena.run_until(ms(400), |arena| prompting(arena) == Some(slot(2))));
    arena.run_for(ms(300));

    arena.press(1);
    arena.run_for(ms(400));
    assert_eq!(prompting(&arena), Some(slot(2)));
    assert_eq!(arena.coordinator.roster().joined_count(), 1);
}

#[test]
fn skip_request_from_the_display_starts_joining() {
    let mut arena = Arena::new(reaction_game(1));
    arena.step();
    assert_eq!(arena.phase(), GamePhase::Idle);

    arena.display.request_skip();
    arena.step();
    assert_eq!(arena.phase(), GamePhase::Joining);
    assert!(arena.elapsed() < ms(300));
    assert_eq!(prompting(&arena), Some(slot(1)));
}

#[test]
fn skip_request_mid_join_is_ignored() {
    let mut arena = Arena::new(reaction_game(1));
    assert!(arena.run_until(ms(2000), |arena| prompting(arena) == Some(slot(1))));
    arena.display.request_skip();
    arena.step();
    arena.step();
    assert_eq!(arena.phase(), GamePhase::Joining);
    assert_eq!(prompting(&arena), Some(slot(1)));
    reflex_duel::assert_no_violations!(arena.observer);
}
