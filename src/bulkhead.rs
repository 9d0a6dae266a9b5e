//! Non-blocking counting semaphore bounding in-flight calls.
//!
//! A bulkhead rejection is semantically distinct from a circuit-open
//! rejection, so this stays a standalone limiter rather than folding into
//! `state_machine`; `breaker.rs` composes the two.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A counting semaphore of `max_concurrent` permits. `try_acquire` never
/// blocks; a `Permit` releases its slot on drop, guaranteeing release on
/// every exit path including panics and early returns.
#[derive(Debug)]
pub struct Bulkhead {
    limit: usize,
    in_flight: AtomicUsize,
}

impl Bulkhead {
    /// Builds an unlimited bulkhead (`max_concurrent` unset).
    pub fn unlimited() -> Self {
        Bulkhead { limit: usize::MAX, in_flight: AtomicUsize::new(0) }
    }

    /// Builds a bulkhead with `limit` permits.
    pub fn new(limit: usize) -> Self {
        Bulkhead { limit, in_flight: AtomicUsize::new(0) }
    }

    /// The configured permit limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Current number of permits in use, for `StatsSnapshot`.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Attempts to acquire one permit without blocking. Returns `None` if
    /// the bulkhead is full.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut current = self.in_flight.load(Ordering::SeqCst);
        loop {
            if current >= self.limit {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(Permit { bulkhead: self }),
                Err(observed) => current = observed,
            }
        }
    }
}

/// A held permit. Releases automatically on drop.
#[derive(Debug)]
pub struct Permit<'a> {
    bulkhead: &'a Bulkhead,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.bulkhead.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_limit() {
        let bulkhead = Bulkhead::new(2);
        let a = bulkhead.try_acquire();
        let b = bulkhead.try_acquire();
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(bulkhead.try_acquire().is_none());
    }

    #[test]
    fn releases_on_drop() {
        let bulkhead = Bulkhead::new(1);
        {
            let _permit = bulkhead.try_acquire().unwrap();
            assert!(bulkhead.try_acquire().is_none());
        }
        assert!(bulkhead.try_acquire().is_some());
    }

    #[test]
    fn unlimited_never_rejects() {
        let bulkhead = Bulkhead::unlimited();
        let permits: Vec<_> = (0..1000).map(|_| bulkhead.try_acquire().unwrap()).collect();
        assert_eq!(1000, permits.len());
    }
}
