//! Loom tests for the button edge capture.
//!
//! `EdgeCapture::on_press` runs in interrupt context while the main loop arms,
//! clears and takes. These tests check that a taken edge always carries the
//! timestamp that was stored for it, and that at most one edge is accepted
//! per arming.
//!
//! Run with:
//! ```bash
//! cd loom-tests
//! RUSTFLAGS="--cfg loom" cargo test --release
//! ```

#![cfg(loom)]

use loom::sync::Arc;
use loom::thread;
use reflex_duel::peer::capture::EdgeCapture;
use web_time::{Duration, Instant};

/// An edge taken by the main loop has the interrupt's timestamp.
#[test]
fn test_taken_edge_carries_its_timestamp() {
    let epoch = Instant::now();
    let pressed_at = epoch + Duration::from_millis(187);
    loom::model(move || {
        let capture = Arc::new(EdgeCapture::new(epoch));
        capture.arm();
        let isr = capture.clone();

        let interrupt = thread::spawn(move || isr.on_press(pressed_at));

        let early = capture.take();
        let recorded = interrupt.join().unwrap();
        let late = capture.take();

        assert!(recorded);
        // Exactly one of the two takes sees the edge.
        match (early, late) {
            (Some(at), None) | (None, Some(at)) => assert_eq!(at, pressed_at),
            other => panic!("edge seen {other:?}"),
        }
    });
}

/// Two racing edges: one wins, and its timestamp is the one taken.
#[test]
fn test_first_edge_wins() {
    let epoch = Instant::now();
    let first = epoch + Duration::from_millis(100);
    let second = epoch + Duration::from_millis(130);
    loom::model(move || {
        let capture = Arc::new(EdgeCapture::new(epoch));
        capture.arm();
        let isr_a = capture.clone();
        let isr_b = capture.clone();

        let a = thread::spawn(move || isr_a.on_press(first));
        let b = thread::spawn(move || isr_b.on_press(second));
        let a_won = a.join().unwrap();
        let b_won = b.join().unwrap();

        assert!(a_won ^ b_won, "exactly one edge is accepted");
        let expected = if a_won { first } else { second };
        assert_eq!(capture.take(), Some(expected));
        assert_eq!(capture.take(), None);
    });
}

/// Clearing races an edge: afterwards the capture is either empty or holds
/// that edge, and it is never armed.
#[test]
fn test_clear_racing_an_edge() {
    let epoch = Instant::now();
    let pressed_at = epoch + Duration::from_millis(50);
    loom::model(move || {
        let capture = Arc::new(EdgeCapture::new(epoch));
        capture.arm();
        let isr = capture.clone();

        let interrupt = thread::spawn(move || isr.on_press(pressed_at));
        capture.clear();
        interrupt.join().unwrap();

        assert!(!capture.is_armed());
        if let Some(at) = capture.take() {
            assert_eq!(at, pressed_at);
        }
    });
}
