//! Flat in-process backend: a deque of timestamped events per breaker,
//! scanned and filtered by timestamp for window counts.
//!
//! Grounded on the rolling-window `VecDeque<RequestResult>` +
//! `prune_history` idiom used by the reliability layer in the pack's
//! Navius-derived example.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use super::{Event, Outcome, Status, Storage};

/// Default retention bound: entries older than this are evicted
/// periodically regardless of window queries.
const DEFAULT_RETENTION: Duration = Duration::from_secs(300);
/// Evict old entries every this many inserts, to amortize the scan.
const EVICT_EVERY: u32 = 32;

#[derive(Debug, Default)]
struct Slot {
    events: VecDeque<Event>,
    status: Option<Status>,
    inserts_since_evict: u32,
}

impl Slot {
    fn evict_older_than(&mut self, retention: Duration) {
        let now = crate::clock::now();
        while let Some(front) = self.events.front() {
            if now.saturating_duration_since(front.at) > retention {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn push(&mut self, event: Event, retention: Duration) {
        self.events.push_back(event);
        self.inserts_since_evict += 1;
        if self.inserts_since_evict >= EVICT_EVERY {
            self.inserts_since_evict = 0;
            self.evict_older_than(retention);
        }
    }

    fn count(&self, window: Duration, kind: Outcome) -> u64 {
        let now = crate::clock::now();
        self.events
            .iter()
            .filter(|e| e.kind == kind && now.saturating_duration_since(e.at) <= window)
            .count() as u64
    }
}

/// In-process flat storage: a `HashMap<name, deque of events>`.
#[derive(Debug)]
pub struct Flat {
    slots: Mutex<HashMap<String, Slot>>,
    retention: Duration,
}

impl Flat {
    /// Builds a flat backend with the default 5 minute retention bound.
    pub fn new() -> Self {
        Flat {
            slots: Mutex::new(HashMap::new()),
            retention: DEFAULT_RETENTION,
        }
    }

    /// Builds a flat backend with a custom retention bound.
    pub fn with_retention(retention: Duration) -> Self {
        Flat {
            slots: Mutex::new(HashMap::new()),
            retention,
        }
    }
}

impl Default for Flat {
    fn default() -> Self {
        Flat::new()
    }
}

impl Storage for Flat {
    fn get_status(&self, name: &str) -> Option<Status> {
        self.slots.lock().get(name).and_then(|slot| slot.status)
    }

    fn set_status(&self, name: &str, status: Status) {
        self.slots.lock().entry(name.to_string()).or_default().status = Some(status);
    }

    fn record_success(&self, name: &str, duration: Duration) {
        self.record_event(name, Event::success(duration));
    }

    fn record_failure(&self, name: &str, duration: Duration) {
        self.record_event(name, Event::failure(duration, "failure"));
    }

    fn success_count(&self, name: &str, window: Duration) -> u64 {
        self.slots
            .lock()
            .get(name)
            .map(|slot| slot.count(window, Outcome::Success))
            .unwrap_or(0)
    }

    fn failure_count(&self, name: &str, window: Duration) -> u64 {
        self.slots
            .lock()
            .get(name)
            .map(|slot| slot.count(window, Outcome::Failure))
            .unwrap_or(0)
    }

    fn record_event(&self, name: &str, event: Event) {
        let mut slots = self.slots.lock();
        let slot = slots.entry(name.to_string()).or_default();
        slot.push(event, self.retention);
    }

    fn event_log(&self, name: &str, limit: usize) -> Vec<Event> {
        self.slots
            .lock()
            .get(name)
            .map(|slot| {
                let len = slot.events.len();
                let skip = len.saturating_sub(limit);
                slot.events.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    fn clear(&self, name: &str) {
        self.slots.lock().remove(name);
    }

    fn clear_all(&self) {
        self.slots.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_counts_within_window() {
        crate::clock::freeze(|time| {
            let flat = Flat::new();
            flat.record_success("svc", Duration::from_millis(1));
            flat.record_failure("svc", Duration::from_millis(1));
            assert_eq!(1, flat.success_count("svc", Duration::from_secs(60)));
            assert_eq!(1, flat.failure_count("svc", Duration::from_secs(60)));

            time.advance(Duration::from_secs(120));
            assert_eq!(0, flat.success_count("svc", Duration::from_secs(60)));
        });
    }

    #[test]
    fn status_round_trips() {
        let flat = Flat::new();
        assert!(flat.get_status("svc").is_none());
        flat.set_status(
            "svc",
            Status {
                state: crate::state_machine::CircuitState::Open,
                opened_at: Some(Instant::now()),
            },
        );
        assert_eq!(
            crate::state_machine::CircuitState::Open,
            flat.get_status("svc").unwrap().state
        );
    }

    #[test]
    fn clear_removes_everything() {
        let flat = Flat::new();
        flat.record_success("svc", Duration::from_millis(1));
        flat.clear("svc");
        assert_eq!(0, flat.success_count("svc", Duration::from_secs(60)));
    }

    #[test]
    fn event_log_is_newest_last() {
        let flat = Flat::new();
        for _ in 0..5 {
            flat.record_success("svc", Duration::from_millis(1));
        }
        let log = flat.event_log("svc", 3);
        assert_eq!(3, log.len());
    }
}
