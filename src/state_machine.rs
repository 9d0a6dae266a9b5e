//! The breaker's finite state machine.
//!
//! Three states (`State::Closed`, `State::Open(until, delay)`,
//! `State::HalfOpen(delay)`), kept here as `Phase`, with `CircuitState` as
//! the public, storage-facing projection of it. Half-open admission
//! counting lives directly on the state machine since it's intrinsic to
//! the `HalfOpen` phase rather than a property of any one failure policy.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::backoff::Backoff;
use super::clock;
use super::instrument::Instrument;

/// The three states a breaker can report to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum CircuitState {
    /// Admitting every call.
    Closed,
    /// Rejecting every call until the cool-off elapses.
    Open,
    /// Admitting at most `half_open_calls` probes.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Internal phase, carrying the payload `CircuitState` alone doesn't.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { opened_at: Instant, delay: Duration },
    HalfOpen,
}

impl Phase {
    fn as_state(&self) -> CircuitState {
        match self {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen => CircuitState::HalfOpen,
        }
    }
}

/// Guards the coordinated variant's `AttemptRecovery`/`Reset` transitions
/// against a declared set of peer breakers.
///
/// Unresolved peers must be treated as permissive: an implementation backed
/// by the registry returns `true` for a dependency it cannot resolve by
/// name.
pub trait DependencyGuard: Send + Sync + fmt::Debug {
    /// `false` blocks `Open → HalfOpen` while any dependency is `Open`.
    fn attempt_recovery_allowed(&self) -> bool {
        true
    }
    /// `false` blocks entry to `Closed` unless every dependency is `Closed`
    /// or `HalfOpen`.
    fn reset_allowed(&self) -> bool {
        true
    }
}

/// The default guard: always permissive, for breakers with no declared
/// dependencies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unguarded;

impl DependencyGuard for Unguarded {}

struct Shared {
    phase: Phase,
}

/// The state machine for one breaker.
pub struct StateMachine {
    name: String,
    shared: Mutex<Shared>,
    half_open_attempts: AtomicU32,
    half_open_successes: AtomicU32,
    half_open_calls: u32,
    backoff: Arc<dyn Backoff>,
    guard: Arc<dyn DependencyGuard>,
    instrument: Arc<dyn Instrument>,
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// What `is_call_permitted` decided, distinguishing the two rejection kinds
/// so callers and instrumentation can record them separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed with the call.
    Permitted,
    /// Rejected: the breaker is `Open` and the cool-off has not elapsed.
    CircuitOpen,
    /// Rejected: `HalfOpen` already has `half_open_calls` probes in flight.
    HalfOpenSaturated,
}

impl StateMachine {
    /// Builds a new, `Closed` state machine.
    pub fn new(
        name: impl Into<String>,
        half_open_calls: u32,
        backoff: Arc<dyn Backoff>,
        guard: Arc<dyn DependencyGuard>,
        instrument: Arc<dyn Instrument>,
    ) -> Self {
        let name = name.into();
        instrument.on_closed(&name);
        StateMachine {
            name,
            shared: Mutex::new(Shared { phase: Phase::Closed }),
            half_open_attempts: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            half_open_calls: half_open_calls.max(1),
            backoff,
            guard,
            instrument,
        }
    }

    /// Restores a state machine from a persisted status record, without
    /// firing entry-action instrumentation.
    pub fn restore(
        name: impl Into<String>,
        half_open_calls: u32,
        backoff: Arc<dyn Backoff>,
        guard: Arc<dyn DependencyGuard>,
        instrument: Arc<dyn Instrument>,
        state: CircuitState,
        opened_at: Option<Instant>,
    ) -> Self {
        let phase = match state {
            CircuitState::Closed => Phase::Closed,
            CircuitState::HalfOpen => Phase::HalfOpen,
            CircuitState::Open => Phase::Open {
                opened_at: opened_at.unwrap_or_else(clock::now),
                delay: backoff.next_delay(),
            },
        };
        StateMachine {
            name: name.into(),
            shared: Mutex::new(Shared { phase }),
            half_open_attempts: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            half_open_calls: half_open_calls.max(1),
            backoff,
            guard,
            instrument,
        }
    }

    /// The breaker's name, for instrumentation and error payloads.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current state.
    pub fn state(&self) -> CircuitState {
        self.shared.lock().phase.as_state()
    }

    /// The instant the breaker entered `Open`, if it currently is.
    pub fn opened_at(&self) -> Option<Instant> {
        match self.shared.lock().phase {
            Phase::Open { opened_at, .. } => Some(opened_at),
            _ => None,
        }
    }

    /// Admission check: performs the lazy `Open → HalfOpen` recovery probe
    /// if the cool-off elapsed, then
    /// enforces the `half_open_calls` cap with an increment-then-check-
    /// then-decrement, never over-admitting under concurrency.
    pub fn is_call_permitted(&self) -> Admission {
        let mut became_half_open = false;
        {
            let mut shared = self.shared.lock();
            if let Phase::Open { opened_at, delay } = shared.phase {
                if clock::now().saturating_duration_since(opened_at) >= delay
                    && self.guard.attempt_recovery_allowed()
                {
                    shared.phase = Phase::HalfOpen;
                    self.half_open_attempts.store(0, Ordering::SeqCst);
                    self.half_open_successes.store(0, Ordering::SeqCst);
                    became_half_open = true;
                }
            }
        }
        if became_half_open {
            self.instrument.on_half_open(&self.name);
        }

        let is_half_open = matches!(self.shared.lock().phase, Phase::HalfOpen);
        if is_half_open {
            let attempt = self.half_open_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > self.half_open_calls {
                self.half_open_attempts.fetch_sub(1, Ordering::SeqCst);
                self.instrument.on_rejected(&self.name);
                return Admission::HalfOpenSaturated;
            }
            return Admission::Permitted;
        }

        match self.shared.lock().phase {
            Phase::Closed => Admission::Permitted,
            Phase::Open { .. } => {
                self.instrument.on_rejected(&self.name);
                Admission::CircuitOpen
            }
            Phase::HalfOpen => unreachable!("handled above"),
        }
    }

    /// Records a success. `success_threshold_met` is computed by the caller
    /// from the success-count window; `on_success` resets to `Closed` when the half-open probe budget or the success
    /// threshold is satisfied, subject to the dependency guard. Returns
    /// whether a transition happened, so the caller knows to persist the
    /// new status.
    pub fn on_success(&self, success_threshold_met: bool) -> bool {
        let mut transitioned = false;
        {
            let mut shared = self.shared.lock();
            if matches!(shared.phase, Phase::HalfOpen) {
                let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if (successes >= self.half_open_calls || success_threshold_met)
                    && self.guard.reset_allowed()
                {
                    shared.phase = Phase::Closed;
                    transitioned = true;
                }
            }
        }
        if transitioned {
            self.instrument.on_closed(&self.name);
        }
        transitioned
    }

    /// Records a failure matching the failure predicate. `threshold_exceeded`
    /// is computed by the caller for the `Closed` case; in `HalfOpen` a
    /// single failure always trips. Returns whether a
    /// transition happened.
    pub fn on_failure(&self, threshold_exceeded: bool) -> bool {
        let mut transitioned = false;
        {
            let mut shared = self.shared.lock();
            match shared.phase {
                Phase::Closed if threshold_exceeded => {
                    let delay = self.backoff.next_delay();
                    shared.phase = Phase::Open {
                        opened_at: clock::now(),
                        delay,
                    };
                    transitioned = true;
                }
                Phase::HalfOpen => {
                    let delay = self.backoff.next_delay();
                    shared.phase = Phase::Open {
                        opened_at: clock::now(),
                        delay,
                    };
                    self.half_open_attempts.store(0, Ordering::SeqCst);
                    self.half_open_successes.store(0, Ordering::SeqCst);
                    transitioned = true;
                }
                _ => {}
            }
        }
        if transitioned {
            self.instrument.on_open(&self.name);
        }
        transitioned
    }

    /// `ForceOpen`: transitions to `Open` unconditionally, unless already
    /// `Open`.
    pub fn force_open(&self) -> bool {
        let mut transitioned = false;
        {
            let mut shared = self.shared.lock();
            if !matches!(shared.phase, Phase::Open { .. }) {
                let delay = self.backoff.next_delay();
                shared.phase = Phase::Open {
                    opened_at: clock::now(),
                    delay,
                };
                transitioned = true;
            }
        }
        if transitioned {
            self.instrument.on_open(&self.name);
        }
        transitioned
    }

    /// `ForceClose`: transitions to `Closed` unconditionally.
    pub fn force_close(&self) -> bool {
        let transitioned = {
            let mut shared = self.shared.lock();
            let was_closed = matches!(shared.phase, Phase::Closed);
            shared.phase = Phase::Closed;
            !was_closed
        };
        self.half_open_attempts.store(0, Ordering::SeqCst);
        self.half_open_successes.store(0, Ordering::SeqCst);
        if transitioned {
            self.instrument.on_closed(&self.name);
        }
        transitioned
    }

    /// `Reset`: transitions to `Closed`, subject to the dependency guard.
    /// Idempotent when already `Closed`.
    pub fn reset(&self) -> bool {
        if !self.guard.reset_allowed() {
            return false;
        }
        self.force_close()
    }
}
