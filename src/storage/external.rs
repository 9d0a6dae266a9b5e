//! External cache adapter: a key-per-metric backend over a pluggable
//! `RemoteCache`, for sharing outcome counters across processes.
//!
//! The production wiring for `RemoteCache` is a thin client over whatever
//! the deployment already runs (the pack's `foofork-riptidecrawler` reaches
//! for the `redis` crate for exactly this shape of adapter); this crate
//! ships only the trait and an in-memory reference implementation so the
//! core stays testable without a live server. See DESIGN.md.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::{Event, Status, Storage};

/// The minimal surface an external cache must expose for `ExternalCache`
/// to use it as a storage backend. Increments should be atomic when the
/// backend supports them (e.g. `INCR` on Redis); `ExternalCache` falls back
/// to `get` + `set` read-modify-write otherwise.
pub trait RemoteCache: Send + Sync + fmt::Debug {
    /// Atomically increments `key` by `by`, treating a missing key as zero,
    /// and returns the new value. Returns `None` if this cache can't
    /// perform the increment atomically, in which case the caller falls
    /// back to `get`/`set`.
    fn incr(&self, key: &str, by: i64) -> Option<i64>;

    /// Reads the current value of `key`.
    fn get(&self, key: &str) -> Option<i64>;

    /// Writes `value` into `key`.
    fn set(&self, key: &str, value: i64);

    /// Deletes every key with the given prefix.
    fn del_prefix(&self, prefix: &str);
}

/// An in-memory `RemoteCache` reference implementation, atomic by
/// construction (`AtomicI64` entries in a `DashMap`). Stands in for a real
/// network-backed cache in tests and examples.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, AtomicI64>,
}

impl InMemoryCache {
    /// Builds an empty in-memory cache.
    pub fn new() -> Self {
        InMemoryCache::default()
    }
}

impl RemoteCache for InMemoryCache {
    fn incr(&self, key: &str, by: i64) -> Option<i64> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| AtomicI64::new(0));
        Some(entry.fetch_add(by, Ordering::SeqCst) + by)
    }

    fn get(&self, key: &str) -> Option<i64> {
        self.entries.get(key).map(|v| v.load(Ordering::SeqCst))
    }

    fn set(&self, key: &str, value: i64) {
        self.entries
            .insert(key.to_string(), AtomicI64::new(value));
    }

    fn del_prefix(&self, prefix: &str) {
        self.entries.retain(|k, _| !k.starts_with(prefix));
    }
}

const DEFAULT_BUCKETS: u64 = 300;

#[derive(Default)]
struct Local {
    status: HashMap<String, Status>,
    events: HashMap<String, VecDeque<Event>>,
}

/// A storage backend keyed per metric on a `RemoteCache`, bucketed by
/// second like `Bucketed` but addressed through cache keys instead of an
/// in-process ring. Status and the event log are kept locally per process;
/// only outcome counters are shared through the cache.
#[derive(Debug)]
pub struct ExternalCache<C> {
    cache: C,
    buckets: u64,
    local: Mutex<Local>,
}

impl fmt::Debug for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Local").finish_non_exhaustive()
    }
}

impl<C> ExternalCache<C>
where
    C: RemoteCache,
{
    /// Builds an adapter over `cache` with the default 300 one-second
    /// buckets.
    pub fn new(cache: C) -> Self {
        ExternalCache::with_buckets(cache, DEFAULT_BUCKETS)
    }

    /// Builds an adapter over `cache` with a custom bucket count.
    pub fn with_buckets(cache: C, buckets: u64) -> Self {
        ExternalCache {
            cache,
            buckets,
            local: Mutex::new(Local::default()),
        }
    }

    fn bucket_key(&self, name: &str, kind: &str, bucket: u64) -> String {
        format!("cb:{name}:{kind}:{bucket}")
    }

    fn record(&self, name: &str, kind: &str) {
        let bucket = crate::clock::unix_seconds() % self.buckets;
        let key = self.bucket_key(name, kind, bucket);
        if self.cache.incr(&key, 1).is_none() {
            let current = self.cache.get(&key).unwrap_or(0);
            self.cache.set(&key, current + 1);
        }
    }

    fn count(&self, name: &str, kind: &str, window: Duration) -> u64 {
        let now = crate::clock::unix_seconds();
        let n = (window.as_secs()).min(self.buckets).max(1);
        (0..n)
            .map(|i| {
                let bucket = now.saturating_sub(i) % self.buckets;
                let key = self.bucket_key(name, kind, bucket);
                self.cache.get(&key).unwrap_or(0).max(0) as u64
            })
            .sum()
    }
}

impl<C> Storage for ExternalCache<C>
where
    C: RemoteCache,
{
    fn get_status(&self, name: &str) -> Option<Status> {
        self.local.lock().status.get(name).copied()
    }

    fn set_status(&self, name: &str, status: Status) {
        self.local.lock().status.insert(name.to_string(), status);
    }

    fn record_success(&self, name: &str, duration: Duration) {
        self.record(name, "success");
        self.record_event(name, Event::success(duration));
    }

    fn record_failure(&self, name: &str, duration: Duration) {
        self.record(name, "failure");
        self.record_event(name, Event::failure(duration, "failure"));
    }

    fn success_count(&self, name: &str, window: Duration) -> u64 {
        self.count(name, "success", window)
    }

    fn failure_count(&self, name: &str, window: Duration) -> u64 {
        self.count(name, "failure", window)
    }

    fn record_event(&self, name: &str, event: Event) {
        let mut local = self.local.lock();
        let log = local.events.entry(name.to_string()).or_default();
        log.push_back(event);
        if log.len() > 4096 {
            log.pop_front();
        }
    }

    fn event_log(&self, name: &str, limit: usize) -> Vec<Event> {
        self.local
            .lock()
            .events
            .get(name)
            .map(|log| {
                let skip = log.len().saturating_sub(limit);
                log.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    fn clear(&self, name: &str) {
        self.cache.del_prefix(&format!("cb:{name}:"));
        let mut local = self.local.lock();
        local.status.remove(name);
        local.events.remove(name);
    }

    fn clear_all(&self) {
        self.cache.del_prefix("cb:");
        let mut local = self.local.lock();
        local.status.clear();
        local.events.clear();
    }

    fn supports_deadline(&self) -> bool {
        // A real network-backed cache can hang; bound it with a deadline.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_increment_counts() {
        crate::clock::freeze(|_| {
            let storage = ExternalCache::new(InMemoryCache::new());
            storage.record_success("svc", Duration::from_millis(1));
            storage.record_success("svc", Duration::from_millis(1));
            storage.record_failure("svc", Duration::from_millis(1));

            assert_eq!(2, storage.success_count("svc", Duration::from_secs(5)));
            assert_eq!(1, storage.failure_count("svc", Duration::from_secs(5)));
        });
    }

    #[test]
    fn clear_drops_prefix_and_local_state() {
        let storage = ExternalCache::new(InMemoryCache::new());
        storage.record_success("svc", Duration::from_millis(1));
        storage.set_status(
            "svc",
            Status {
                state: crate::state_machine::CircuitState::Closed,
                opened_at: None,
            },
        );
        storage.clear("svc");
        assert_eq!(0, storage.success_count("svc", Duration::from_secs(60)));
        assert!(storage.get_status("svc").is_none());
    }

    #[test]
    fn supports_deadline_is_true() {
        let storage = ExternalCache::new(InMemoryCache::new());
        assert!(storage.supports_deadline());
    }
}
