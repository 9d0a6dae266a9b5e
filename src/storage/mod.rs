//! Pluggable storage layer: outcome counters, status persistence, and an
//! event log, behind one `Storage` trait with five backends.

mod bucketed;
mod chain;
mod external;
mod flat;
mod null;

pub use bucketed::Bucketed;
pub use chain::{BackendHealth, BackendSlot, FallbackChain, HealthState};
pub use external::ExternalCache;
pub use flat::Flat;
pub use null::Null;

use std::convert::Infallible;
use std::fmt;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::BreakerError;
use crate::state_machine::CircuitState;

/// The four outcome kinds an event can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// An admitted call returned successfully.
    Success,
    /// An admitted call returned an error matching the failure predicate.
    Failure,
    /// The breaker transitioned to a new state.
    StateChange,
    /// A call was rejected before it ran.
    Rejection(RejectionKind),
}

/// Why a call was rejected, recorded alongside a `Rejection` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectionKind {
    /// The breaker was `Open`.
    CircuitOpen,
    /// The bulkhead had no free permits.
    BulkheadFull,
    /// A half-open probe slot was already claimed by concurrent callers.
    HalfOpenSaturated,
}

/// One entry in a breaker's event log.
#[derive(Debug, Clone)]
pub struct Event {
    /// What kind of outcome this event records.
    pub kind: Outcome,
    /// Monotonic timestamp of the event.
    pub at: Instant,
    /// How long the call (or rejection check) took.
    pub duration: Duration,
    /// The caller error's `Display` rendering, if any.
    pub error: Option<String>,
    /// The state the breaker transitioned to, for `StateChange` events.
    pub new_state: Option<CircuitState>,
}

impl Event {
    /// Builds a `Success` event.
    pub fn success(duration: Duration) -> Self {
        Event {
            kind: Outcome::Success,
            at: crate::clock::now(),
            duration,
            error: None,
            new_state: None,
        }
    }

    /// Builds a `Failure` event.
    pub fn failure(duration: Duration, error: impl fmt::Display) -> Self {
        Event {
            kind: Outcome::Failure,
            at: crate::clock::now(),
            duration,
            error: Some(error.to_string()),
            new_state: None,
        }
    }

    /// Builds a `Rejection` event.
    pub fn rejection(kind: RejectionKind) -> Self {
        Event {
            kind: Outcome::Rejection(kind),
            at: crate::clock::now(),
            duration: Duration::ZERO,
            error: None,
            new_state: None,
        }
    }

    /// Builds a `StateChange` event.
    pub fn state_change(new_state: CircuitState) -> Self {
        Event {
            kind: Outcome::StateChange,
            at: crate::clock::now(),
            duration: Duration::ZERO,
            error: None,
            new_state: Some(new_state),
        }
    }
}

/// The persisted state record for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// The breaker's state at the time this record was written.
    pub state: CircuitState,
    /// The instant the breaker entered `Open`, if `state == Open`.
    pub opened_at: Option<Instant>,
}

/// The storage contract every backend implements.
///
/// Every method is keyed by breaker name so one backend instance can be
/// shared by many breakers (and, for the external/chain backends, by many
/// processes).
pub trait Storage: Send + Sync + fmt::Debug {
    /// Reads the last-persisted status, or `None` if this breaker has never
    /// written one.
    fn get_status(&self, name: &str) -> Option<Status>;

    /// Persists a status record.
    fn set_status(&self, name: &str, status: Status);

    /// Records a successful call's duration.
    fn record_success(&self, name: &str, duration: Duration);

    /// Records a failed call's duration.
    fn record_failure(&self, name: &str, duration: Duration);

    /// Counts successes within the trailing `window`.
    fn success_count(&self, name: &str, window: Duration) -> u64;

    /// Counts failures within the trailing `window`.
    fn failure_count(&self, name: &str, window: Duration) -> u64;

    /// Appends an event to the log, evicting the oldest entry at capacity.
    fn record_event(&self, name: &str, event: Event);

    /// Returns up to `limit` most recent events, oldest first.
    fn event_log(&self, name: &str, limit: usize) -> Vec<Event>;

    /// Drops all state for one breaker.
    fn clear(&self, name: &str);

    /// Drops all state for every breaker this backend knows about.
    fn clear_all(&self);

    /// Whether this backend can meaningfully enforce a deadline on its own
    /// operations (e.g. it performs real I/O). In-process backends return
    /// `false`, so `with_timeout` runs transparently against them.
    fn supports_deadline(&self) -> bool {
        false
    }
}

/// Runs `op` under a deadline, if `supports_deadline` says the calling
/// backend has one. Backends that can't enforce a deadline execute `op`
/// transparently on the calling thread;
/// others run it on a helper thread and race it against `timeout_ms`.
///
/// Takes the capability as a plain `bool` (rather than `&dyn Storage`) so
/// callers can move an owned backend handle into `op` without fighting the
/// borrow checker over a reference obtained from the same handle.
pub fn with_timeout<R, F>(supports_deadline: bool, timeout_ms: u64, op: F) -> Result<R, BreakerError<Infallible>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if timeout_ms == 0 || !supports_deadline {
        return Ok(op());
    }

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(op());
    });

    match rx.recv_timeout(Duration::from_millis(timeout_ms)) {
        Ok(value) => Ok(value),
        Err(_) => Err(BreakerError::StorageTimeout { limit_ms: timeout_ms }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_timeout_transparent_by_default() {
        let storage = Null::new();
        let result = with_timeout(storage.supports_deadline(), 50, || 42);
        assert_eq!(42, result.unwrap());
    }
}
