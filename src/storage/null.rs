//! No-op backend: returns zero/`None` for everything. Useful as the default
//! for breakers that don't need persisted history (e.g. in benches) and as
//! a terminal, always-failing-softly member of a fallback chain during
//! tests.

use std::time::Duration;

use super::{Event, Status, Storage};

/// A storage backend that records nothing and reports empty state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Null;

impl Null {
    /// Builds a no-op backend.
    pub fn new() -> Self {
        Null
    }
}

impl Storage for Null {
    fn get_status(&self, _name: &str) -> Option<Status> {
        None
    }

    fn set_status(&self, _name: &str, _status: Status) {}

    fn record_success(&self, _name: &str, _duration: Duration) {}

    fn record_failure(&self, _name: &str, _duration: Duration) {}

    fn success_count(&self, _name: &str, _window: Duration) -> u64 {
        0
    }

    fn failure_count(&self, _name: &str, _window: Duration) -> u64 {
        0
    }

    fn record_event(&self, _name: &str, _event: Event) {}

    fn event_log(&self, _name: &str, _limit: usize) -> Vec<Event> {
        Vec::new()
    }

    fn clear(&self, _name: &str) {}

    fn clear_all(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_nothing() {
        let null = Null::new();
        null.record_success("svc", Duration::from_millis(1));
        assert_eq!(0, null.success_count("svc", Duration::from_secs(1)));
        assert!(null.get_status("svc").is_none());
        assert!(null.event_log("svc", 10).is_empty());
    }
}
