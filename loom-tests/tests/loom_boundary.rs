//! Loom tests for the state boundary between the game loop and a renderer.
//!
//! The game loop publishes with `try_apply` while a renderer concurrently takes
//! commands or copies the snapshot. Under loom the bounded lock degrades to a
//! single `try_lock`, so every "lock busy" path is explored too.
//!
//! Run with:
//! ```bash
//! cd loom-tests
//! RUSTFLAGS="--cfg loom" cargo test --release
//! ```

#![cfg(loom)]

use loom::thread;
use reflex_duel::{StateBoundary, UiCommand};
use web_time::Duration;

const WAIT: Duration = Duration::from_millis(1);

/// Publishes one countdown command, retrying until the lock is had.
fn publish(boundary: &StateBoundary, n: u8) {
    while !boundary.try_apply(WAIT, |snapshot| {
        snapshot.commands.push(UiCommand::ShowCountdown { n });
        snapshot.countdown = Some(n);
    }) {
        thread::yield_now();
    }
}

/// Commands are neither lost nor duplicated between publisher and taker.
#[test]
fn test_publish_and_take_conserve_commands() {
    loom::model(|| {
        let boundary = StateBoundary::new();
        let publisher = boundary.clone();

        let game_loop = thread::spawn(move || {
            publish(&publisher, 3);
            publish(&publisher, 2);
        });

        // The renderer takes once; a busy lock is simply a skipped frame.
        let mut taken = boundary.take_commands(WAIT).unwrap_or_default();

        game_loop.join().unwrap();

        taken.extend(boundary.take_commands(WAIT).unwrap());
        assert_eq!(
            taken,
            vec![
                UiCommand::ShowCountdown { n: 3 },
                UiCommand::ShowCountdown { n: 2 },
            ]
        );
    });
}

/// A copied snapshot is always one the publisher completed.
#[test]
fn test_snapshot_is_never_torn() {
    loom::model(|| {
        let boundary = StateBoundary::new();
        let publisher = boundary.clone();

        let game_loop = thread::spawn(move || {
            publish(&publisher, 3);
        });

        if let Some(snapshot) = boundary.snapshot(WAIT) {
            match snapshot.revision {
                0 => {
                    assert_eq!(snapshot.countdown, None);
                    assert!(snapshot.commands.is_empty());
                },
                1 => {
                    assert_eq!(snapshot.countdown, Some(3));
                    assert_eq!(snapshot.commands.len(), 1);
                },
                other => panic!("unexpected revision {other}"),
            }
        }

        game_loop.join().unwrap();
        assert_eq!(boundary.snapshot(WAIT).unwrap().revision, 1);
    });
}

/// Every failed acquisition is counted exactly once.
#[test]
fn test_contention_is_counted() {
    loom::model(|| {
        let boundary = StateBoundary::new();
        let renderer = boundary.clone();

        let reader = thread::spawn(move || renderer.snapshot(WAIT).is_none());
        let published = boundary.try_apply(WAIT, |snapshot| snapshot.round = 1);
        let reader_missed = reader.join().unwrap();

        let misses = u64::from(!published) + u64::from(reader_missed);
        assert_eq!(boundary.contention_count(), misses);
    });
}
