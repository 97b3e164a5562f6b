//! Loom tests for CollectingObserver thread safety.
//!
//! The observer is shared between the coordinator's game loop and the
//! renderer side of the state boundary, so violations can be reported from
//! two threads at once. These tests explore those interleavings.
//!
//! Run with:
//! ```bash
//! cd loom-tests
//! RUSTFLAGS="--cfg loom" cargo test --release
//! ```

#![cfg(loom)]

use loom::sync::Arc;
use loom::thread;
use reflex_duel::telemetry::{
    CollectingObserver, Violation, ViolationKind, ViolationObserver, ViolationSeverity,
};

/// Creates a minimal violation.
fn make_violation(id: u32, kind: ViolationKind) -> Violation {
    Violation::new(
        ViolationSeverity::Warning,
        kind,
        format!("test violation {}", id),
        "loom_telemetry.rs:1",
    )
}

/// Game loop and renderer report at the same time.
#[test]
fn test_concurrent_violations_write() {
    loom::model(|| {
        let observer = Arc::new(CollectingObserver::new());
        let game_loop = observer.clone();
        let renderer = observer.clone();

        let t1 = thread::spawn(move || {
            game_loop.on_violation(&make_violation(1, ViolationKind::Delivery));
        });
        let t2 = thread::spawn(move || {
            renderer.on_violation(&make_violation(2, ViolationKind::Boundary));
        });

        t1.join().unwrap();
        t2.join().unwrap();

        assert_eq!(observer.len(), 2);
        assert!(observer.has_violation(ViolationKind::Delivery));
        assert!(observer.has_violation(ViolationKind::Boundary));
    });
}

/// Readers see the list before or after a write, never in between.
#[test]
fn test_concurrent_read_write() {
    loom::model(|| {
        let observer = Arc::new(CollectingObserver::new());
        observer.on_violation(&make_violation(0, ViolationKind::Protocol));

        let writer = observer.clone();
        let reader = observer.clone();

        let write_handle = thread::spawn(move || {
            writer.on_violation(&make_violation(1, ViolationKind::Timing));
        });
        let read_handle = thread::spawn(move || reader.violations().len());

        write_handle.join().unwrap();
        let read_count = read_handle.join().unwrap();

        assert!(
            read_count == 1 || read_count == 2,
            "Reader should see 1 or 2 violations, got {}",
            read_count
        );
        assert_eq!(observer.len(), 2);
    });
}

/// `clear()` racing a write leaves either nothing or exactly that write.
#[test]
fn test_violations_clear_concurrent() {
    loom::model(|| {
        let observer = Arc::new(CollectingObserver::new());
        observer.on_violation(&make_violation(0, ViolationKind::Join));

        let writer = observer.clone();
        let clearer = observer.clone();

        let write_handle = thread::spawn(move || {
            writer.on_violation(&make_violation(1, ViolationKind::Transport));
        });
        let clear_handle = thread::spawn(move || clearer.clear());

        write_handle.join().unwrap();
        clear_handle.join().unwrap();

        let remaining = observer.violations();
        assert!(remaining.len() <= 1);
        assert!(!observer.has_violation(ViolationKind::Join));
        if let Some(violation) = remaining.first() {
            assert_eq!(violation.kind, ViolationKind::Transport);
        }
    });
}

/// Four controllers' worth of writers under a preemption bound.
#[test]
fn test_bounded_preemption_stress() {
    let mut builder = loom::model::Builder::new();
    builder.preemption_bound = Some(2);

    builder.check(|| {
        let observer = Arc::new(CollectingObserver::new());

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let obs = observer.clone();
                thread::spawn(move || {
                    obs.on_violation(&make_violation(i, ViolationKind::Protocol));
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(observer.len(), 3);
    });
}
