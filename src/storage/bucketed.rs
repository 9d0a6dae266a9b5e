//! Bucketed in-process backend: a fixed ring of one-second buckets per
//! breaker, each holding atomic success/failure counters.
//!
//! Expires lazily on access, zeroing any skipped slices, rebuilt with
//! per-bucket atomics and a compare-and-set rotation so at most one thread
//! advances the ring per tick.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::{Event, Status, Storage};

/// Default ring size: 300 one-second buckets (5 minutes of history).
pub const DEFAULT_BUCKETS: usize = 300;

#[derive(Debug)]
struct Bucket {
    success: AtomicU64,
    failure: AtomicU64,
}

impl Bucket {
    fn zeroed() -> Self {
        Bucket {
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
        }
    }

    fn zero(&self) {
        self.success.store(0, Ordering::Relaxed);
        self.failure.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct Ring {
    buckets: Vec<Bucket>,
    /// Ring index of the bucket representing the current second.
    index: AtomicUsize,
    /// The second (via `clock::unix_seconds`) the current index represents.
    current_second: AtomicU64,
    events: Mutex<VecDeque<Event>>,
    status: Mutex<Option<Status>>,
}

impl Ring {
    fn new(size: usize) -> Self {
        Ring {
            buckets: (0..size).map(|_| Bucket::zeroed()).collect(),
            index: AtomicUsize::new(0),
            current_second: AtomicU64::new(crate::clock::unix_seconds()),
            events: Mutex::new(VecDeque::new()),
            status: Mutex::new(None),
        }
    }

    /// Advances the ring to the current second, zeroing any buckets that
    /// were skipped. At most one racing thread performs the zeroing for any
    /// given advance; the rest observe the already-rotated ring.
    fn rotate(&self) {
        let now = crate::clock::unix_seconds();
        loop {
            let last = self.current_second.load(Ordering::Acquire);
            if now <= last {
                return;
            }
            if self
                .current_second
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let diff = now - last;
                let len = self.buckets.len() as u64;
                let to_zero = diff.min(len);
                let start = self.index.load(Ordering::Acquire);
                for i in 1..=to_zero {
                    let idx = (start + i as usize) % self.buckets.len();
                    self.buckets[idx].zero();
                }
                let new_index = (start + (diff as usize)) % self.buckets.len();
                self.index.store(new_index, Ordering::Release);
                return;
            }
        }
    }

    fn record(&self, success: bool) {
        self.rotate();
        let idx = self.index.load(Ordering::Acquire);
        if success {
            self.buckets[idx].success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.buckets[idx].failure.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn count(&self, window: Duration, success: bool) -> u64 {
        self.rotate();
        let len = self.buckets.len();
        let n = (window.as_secs() as usize).min(len).max(1);
        let idx = self.index.load(Ordering::Acquire);
        let mut sum = 0u64;
        for i in 0..n {
            let bucket_idx = (idx + len - i) % len;
            sum += if success {
                self.buckets[bucket_idx].success.load(Ordering::Relaxed)
            } else {
                self.buckets[bucket_idx].failure.load(Ordering::Relaxed)
            };
        }
        sum
    }
}

/// Bucketed in-process storage backend: fixed ring of `B` one-second
/// buckets per breaker name.
#[derive(Debug)]
pub struct Bucketed {
    rings: DashMap<String, Ring>,
    bucket_count: usize,
}

impl Bucketed {
    /// Builds a bucketed backend with the default 300-bucket (5 minute) ring.
    pub fn new() -> Self {
        Bucketed::with_buckets(DEFAULT_BUCKETS)
    }

    /// Builds a bucketed backend with a custom ring size.
    pub fn with_buckets(bucket_count: usize) -> Self {
        Bucketed {
            rings: DashMap::new(),
            bucket_count,
        }
    }

    fn ring(&self, name: &str) -> dashmap::mapref::one::Ref<'_, String, Ring> {
        if !self.rings.contains_key(name) {
            self.rings
                .entry(name.to_string())
                .or_insert_with(|| Ring::new(self.bucket_count));
        }
        self.rings.get(name).expect("just inserted")
    }
}

impl Default for Bucketed {
    fn default() -> Self {
        Bucketed::new()
    }
}

impl Storage for Bucketed {
    fn get_status(&self, name: &str) -> Option<Status> {
        self.rings.get(name).and_then(|r| *r.status.lock())
    }

    fn set_status(&self, name: &str, status: Status) {
        *self.ring(name).status.lock() = Some(status);
    }

    fn record_success(&self, name: &str, duration: Duration) {
        self.ring(name).record(true);
        self.record_event(name, Event::success(duration));
    }

    fn record_failure(&self, name: &str, duration: Duration) {
        self.ring(name).record(false);
        self.record_event(name, Event::failure(duration, "failure"));
    }

    fn success_count(&self, name: &str, window: Duration) -> u64 {
        self.rings
            .get(name)
            .map(|r| r.count(window, true))
            .unwrap_or(0)
    }

    fn failure_count(&self, name: &str, window: Duration) -> u64 {
        self.rings
            .get(name)
            .map(|r| r.count(window, false))
            .unwrap_or(0)
    }

    fn record_event(&self, name: &str, event: Event) {
        let ring = self.ring(name);
        let mut events = ring.events.lock();
        events.push_back(event);
        if events.len() > 4096 {
            events.pop_front();
        }
    }

    fn event_log(&self, name: &str, limit: usize) -> Vec<Event> {
        self.rings
            .get(name)
            .map(|r| {
                let events = r.events.lock();
                let len = events.len();
                let skip = len.saturating_sub(limit);
                events.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    fn clear(&self, name: &str) {
        self.rings.remove(name);
    }

    fn clear_all(&self) {
        self.rings.clear();
    }

    fn supports_deadline(&self) -> bool {
        // Pure in-memory atomics; nothing to bound with a deadline.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::CircuitState;

    #[test]
    fn sums_within_window() {
        crate::clock::freeze(|_| {
            let storage = Bucketed::with_buckets(10);
            storage.record_success("svc", Duration::from_millis(1));
            storage.record_success("svc", Duration::from_millis(1));
            storage.record_failure("svc", Duration::from_millis(1));

            assert_eq!(2, storage.success_count("svc", Duration::from_secs(5)));
            assert_eq!(1, storage.failure_count("svc", Duration::from_secs(5)));
        });
    }

    #[test]
    fn rotates_out_old_buckets() {
        crate::clock::freeze(|time| {
            let storage = Bucketed::with_buckets(3);
            storage.record_success("svc", Duration::from_millis(1));
            assert_eq!(1, storage.success_count("svc", Duration::from_secs(3)));

            time.advance(Duration::from_secs(5));
            assert_eq!(0, storage.success_count("svc", Duration::from_secs(3)));
        });
    }

    #[test]
    fn status_round_trips() {
        let storage = Bucketed::new();
        assert!(storage.get_status("svc").is_none());
        storage.set_status(
            "svc",
            Status {
                state: CircuitState::HalfOpen,
                opened_at: None,
            },
        );
        assert_eq!(CircuitState::HalfOpen, storage.get_status("svc").unwrap().state);
    }

    #[test]
    fn clear_drops_ring_and_status() {
        let storage = Bucketed::new();
        storage.record_success("svc", Duration::from_millis(1));
        storage.clear("svc");
        assert_eq!(0, storage.success_count("svc", Duration::from_secs(60)));
        assert!(storage.get_status("svc").is_none());
    }
}
