//! Synchronization primitives abstraction for loom testing compatibility.
//!
//! Production code uses `parking_lot` and `std` atomics; under
//! `RUSTFLAGS="--cfg loom"` the same names resolve to `loom` so the state
//! boundary and the edge capture can be model-checked.
//!
//! # Usage
//!
//! ```ignore
//! use crate::sync::{Arc, AtomicBool, Mutex, Ordering};
//! ```
//!
//! # Loom Testing
//!
//! Run loom tests from the isolated `loom-tests/` crate:
//! ```bash
//! cd loom-tests
//! RUSTFLAGS="--cfg loom" cargo test --release
//! ```
//!
//! ## Bounded lock acquisition
//!
//! `parking_lot::Mutex::try_lock_for` has no loom counterpart. Under loom the
//! [`Mutex`] wrapper degrades it to a single `try_lock`, which still lets the
//! model explore the "lock busy, skip this tick" path.

// ============================================================================
// LOOM CONFIGURATION
// ============================================================================

/// When running under loom (`RUSTFLAGS="--cfg loom"`), use loom's types
#[cfg(loom)]
pub(crate) mod inner {
    pub use loom::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    pub use loom::sync::Arc;
    pub use loom::sync::MutexGuard;
    #[allow(unused_imports)] // Used for API consistency
    pub use loom::thread;

    /// Loom mutex with the `parking_lot` calling convention.
    #[derive(Debug)]
    pub struct Mutex<T>(loom::sync::Mutex<T>);

    impl<T> Mutex<T> {
        pub fn new(value: T) -> Self {
            Self(loom::sync::Mutex::new(value))
        }

        pub fn lock(&self) -> MutexGuard<'_, T> {
            self.0
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }

        pub fn try_lock_for(&self, _timeout: web_time::Duration) -> Option<MutexGuard<'_, T>> {
            self.0.try_lock().ok()
        }
    }

    /// Yield to the loom scheduler.
    #[inline]
    #[allow(dead_code)] // May not be used in all loom tests
    pub fn yield_now() {
        loom::thread::yield_now();
    }
}

/// In production, use parking_lot for performance
#[cfg(not(loom))]
pub(crate) mod inner {
    pub use parking_lot::Mutex;
    #[allow(unused_imports)] // Used for loom compatibility abstraction
    pub use parking_lot::MutexGuard;
    pub use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    pub use std::sync::Arc;
    #[allow(unused_imports)] // Used for loom compatibility abstraction
    pub use std::thread;

    /// No-op in production - only meaningful under loom
    #[inline]
    #[allow(dead_code)] // Used via loom compatibility abstraction in tests
    pub fn yield_now() {
        std::thread::yield_now();
    }
}

// Re-export at module level for convenience
pub(crate) use inner::*;

// ============================================================================
// TESTING UTILITIES
// ============================================================================

/// Run a loom model test. Under loom, this explores all possible
/// thread interleavings. In production, it just runs the closure once.
#[cfg(loom)]
#[allow(dead_code)] // Available for loom tests in tests/ or loom-tests/
pub fn model<F>(f: F)
where
    F: Fn() + Sync + Send + 'static,
{
    loom::model(f);
}

/// In production, just run the closure once
#[cfg(not(loom))]
#[allow(dead_code)] // Available for production code that wants loom-compatible testing
pub fn model<F>(f: F)
where
    F: FnOnce(),
{
    f();
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(all(test, not(loom)))]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use web_time::Duration;

    #[test]
    fn bounded_lock_fails_while_held() {
        let mutex = Arc::new(Mutex::new(0u32));
        let guard = mutex.lock();
        assert!(mutex.try_lock_for(Duration::from_millis(1)).is_none());
        drop(guard);
        assert!(mutex.try_lock_for(Duration::from_millis(1)).is_some());
    }

    #[test]
    fn bounded_lock_across_threads() {
        let mutex = Arc::new(Mutex::new(0u32));
        let other = mutex.clone();
        let handle = thread::spawn(move || {
            if let Some(mut guard) = other.try_lock_for(Duration::from_millis(100)) {
                *guard += 1;
            }
        });
        {
            let mut guard = mutex.lock();
            *guard += 1;
        }
        handle.join().unwrap();
        assert!(*mutex.lock() >= 1);
    }

    #[test]
    fn model_runs_closure_once() {
        let flag = AtomicBool::new(false);
        model(|| flag.store(true, Ordering::SeqCst));
        assert!(flag.load(Ordering::SeqCst));
    }
}
