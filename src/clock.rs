//! Ambient monotonic time source.
//!
//! The core never reads `Instant::now()` directly outside this module, so a
//! test can freeze time on the current thread and drive a breaker through a
//! scenario deterministically.

use std::cell::Cell;
use std::time::{Duration, Instant};

thread_local!(static CLOCK: Cell<Option<*const MockClock>> = Cell::new(None));

/// A thread-local clock override used by tests.
#[derive(Debug)]
pub struct MockClock(Instant);

impl MockClock {
    fn new() -> MockClock {
        MockClock(Instant::now())
    }

    /// Current frozen instant.
    pub fn now(&self) -> Instant {
        self.0
    }

    /// Advances the frozen clock by `diff`.
    pub fn advance(&mut self, diff: Duration) {
        self.0 += diff
    }
}

/// Freezes the clock for the duration of `f`, on the current thread only.
///
/// # Panics
///
/// Panics if a clock is already frozen on this thread.
pub fn freeze<F, R>(f: F) -> R
where
    F: FnOnce(&mut MockClock) -> R,
{
    CLOCK.with(|cell| {
        let mut clock = MockClock::new();

        assert!(
            cell.get().is_none(),
            "clock already frozen for this thread"
        );

        // Ensure the clock is removed from thread-local storage even if `f` panics.
        struct Reset<'a>(&'a Cell<Option<*const MockClock>>);

        impl<'a> Drop for Reset<'a> {
            fn drop(&mut self) {
                self.0.set(None);
            }
        }

        let _reset = Reset(cell);

        cell.set(Some(&clock as *const MockClock));

        f(&mut clock)
    })
}

/// The current monotonic instant: the frozen clock if one is active on this
/// thread, otherwise `Instant::now()`.
pub fn now() -> Instant {
    CLOCK.with(|current| match current.get() {
        Some(ptr) => unsafe { (*ptr).now() },
        None => Instant::now(),
    })
}

thread_local! {
    static EPOCH: Instant = Instant::now();
}

/// Coarse second-resolution timestamp, for storage backends that bucket by
/// whole seconds (`storage::bucketed`). Relative to an arbitrary per-thread
/// epoch, so it is only meaningful as a difference between two calls.
pub fn unix_seconds() -> u64 {
    EPOCH.with(|epoch| now().saturating_duration_since(*epoch).as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_overrides_now() {
        freeze(|time| {
            let a = now();
            time.advance(Duration::from_secs(5));
            let b = now();
            assert_eq!(Duration::from_secs(5), b - a);
        });
    }

    #[test]
    fn now_advances_without_freeze() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }
}
