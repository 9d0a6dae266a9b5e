//! The protected call boundary: wires the state machine, storage, bulkhead,
//! hedging and cascade coordination into one `Breaker<T, E>::call`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::backoff::EqualJittered;
use crate::bulkhead::Bulkhead;
use crate::cascade::CascadeInfo;
use crate::clock;
use crate::config::{Config, Threshold};
use crate::error::{BreakerError, CallError};
use crate::hedge::{self, CancelToken, HedgeOutcome};
use crate::registry::{AnyBreaker, Registry, RegistryGuard};
use crate::state_machine::{Admission, CircuitState, DependencyGuard, StateMachine, Unguarded};
use crate::storage::{Event, RejectionKind, Status};

/// A point-in-time snapshot of one breaker's counters, for dashboards and
/// health checks.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    /// The breaker's name.
    pub name: String,
    /// Its current state.
    pub state: CircuitState,
    /// Permits currently held.
    pub in_flight: usize,
    /// The configured bulkhead limit, if any.
    pub bulkhead_limit: Option<usize>,
    /// Successes within the trailing failure window.
    pub success_count: u64,
    /// Failures within the trailing failure window.
    pub failure_count: u64,
}

/// A circuit breaker over operations returning `Result<T, E>`.
///
/// Construct with `Breaker::new`, call it with `call`, and read its state
/// with `state`/`stats`. Cheap to wrap in an `Arc` and share across threads;
/// every method takes `&self`.
pub struct Breaker<T, E> {
    name: String,
    config: Config<T, E>,
    state_machine: StateMachine,
    bulkhead: Bulkhead,
    cascade: Option<CascadeInfo>,
}

impl<T, E> fmt::Debug for Breaker<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T, E> Breaker<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Builds a breaker named `name` from `config`. If `config.storage`
    /// already holds a status record for this name (a process restart, or a
    /// shared external backend), the state machine resumes from it instead
    /// of starting `Closed`. Registers a weak handle under `name` in
    /// `Registry::global()`, so cascade coordination and the coordinated
    /// variant's dependency lookups can resolve this breaker by name without
    /// any further action from the caller.
    ///
    /// Returns an `Arc<Self>` rather than a bare `Self`: the registry only
    /// ever holds a `Weak` handle, so the breaker callers drive calls
    /// through must be the same allocation the registry can resolve back
    /// to, which only works if construction hands out a shared handle from
    /// the start.
    pub fn new(name: impl Into<String>, config: Config<T, E>) -> Arc<Self> {
        let name = name.into();
        if let Err(err) = config.validate() {
            tracing::warn!(breaker = %name, %err, "breaker configuration is invalid");
        }

        let guard: Arc<dyn DependencyGuard> = if config.dependencies.is_empty() {
            Arc::new(Unguarded)
        } else {
            Arc::new(RegistryGuard::new(config.dependencies.clone()))
        };
        let backoff = Arc::new(EqualJittered::new(config.reset_timeout, config.jitter_factor));

        let state_machine = match config.storage.get_status(&name) {
            Some(status) => StateMachine::restore(
                name.clone(),
                config.half_open_calls,
                backoff,
                guard,
                config.instrument.clone(),
                status.state,
                status.opened_at,
            ),
            None => StateMachine::new(name.clone(), config.half_open_calls, backoff, guard, config.instrument.clone()),
        };

        let bulkhead = match config.max_concurrent {
            Some(limit) => Bulkhead::new(limit),
            None => Bulkhead::unlimited(),
        };

        let cascade = if config.cascade_dependents.is_empty() {
            None
        } else {
            Some(CascadeInfo::new(
                config.cascade_dependents.clone(),
                config.emergency_hook.clone(),
                config.on_cascade.clone(),
            ))
        };

        let breaker = Arc::new(Breaker { name, config, state_machine, bulkhead, cascade });
        let handle = Arc::downgrade(&(breaker.clone() as Arc<dyn AnyBreaker>));
        Registry::global().register(&breaker.name, handle);
        breaker
    }

    /// The breaker's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current state.
    pub fn state(&self) -> CircuitState {
        self.state_machine.state()
    }

    /// The configuration this breaker was built from.
    pub fn configuration(&self) -> &Config<T, E> {
        &self.config
    }

    /// Up to `limit` most recent outcome events, oldest first.
    pub fn event_log(&self, limit: usize) -> Vec<Event> {
        self.config.storage.event_log(&self.name, limit)
    }

    /// A snapshot of this breaker's counters.
    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            name: self.name.clone(),
            state: self.state(),
            in_flight: self.bulkhead.in_flight(),
            bulkhead_limit: self.config.max_concurrent,
            success_count: self.config.storage.success_count(&self.name, self.config.failure_window),
            failure_count: self.config.storage.failure_count(&self.name, self.config.failure_window),
        }
    }

    /// Forces `Open`, rejecting every call until a later `force_close` or
    /// `reset`.
    pub fn force_open(&self) {
        if self.state_machine.force_open() {
            self.persist_status();
        }
    }

    /// Forces `Closed` unconditionally, bypassing the dependency guard.
    pub fn force_close(&self) {
        if self.state_machine.force_close() {
            self.persist_status();
        }
    }

    /// Requests `Closed`, subject to the dependency guard; a no-op if the
    /// guard refuses.
    pub fn reset(&self) {
        if self.state_machine.reset() {
            self.persist_status();
        }
    }

    /// Forces `Closed` and discards every counter and logged event, as
    /// opposed to `reset`, which only changes state.
    pub fn hard_reset(&self) {
        self.config.storage.clear(&self.name);
        self.state_machine.force_close();
        self.persist_status();
    }

    fn persist_status(&self) {
        let status = Status { state: self.state(), opened_at: self.state_machine.opened_at() };
        self.config.storage.set_status(&self.name, status);
        self.config.storage.record_event(&self.name, Event::state_change(status.state));
    }

    /// Runs `op` through the breaker: admission check, bulkhead, execution,
    /// outcome classification, state transition, and (if configured)
    /// fallback resolution on rejection or failure.
    ///
    /// `op` must be callable more than once and safely shareable across
    /// threads, since hedging (when enabled) races it concurrently.
    pub fn call<F>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        let op: Arc<dyn Fn() -> Result<T, E> + Send + Sync> = Arc::new(op);
        if self.config.hedging.enabled && self.config.hedging.max_requests > 1 {
            let attempts = (0..self.config.hedging.max_requests).map(|_| op.clone()).collect();
            self.call_with(attempts)
        } else {
            self.call_with(vec![op])
        }
    }

    /// Runs a distinct operation per hedged attempt (spec's "distinct
    /// backends" hedging mode), racing all of them the same way `call` races
    /// repeated attempts.
    pub fn call_hedged<F>(&self, backends: Vec<F>) -> Result<T, CallError<E>>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        let attempts = backends.into_iter().map(|f| Arc::new(f) as Arc<dyn Fn() -> Result<T, E> + Send + Sync>).collect();
        self.call_with(attempts)
    }

    fn call_with(&self, attempts: Vec<Arc<dyn Fn() -> Result<T, E> + Send + Sync>>) -> Result<T, CallError<E>> {
        let permit = match self.bulkhead.try_acquire() {
            Some(permit) => permit,
            None => {
                self.config.storage.record_event(&self.name, Event::rejection(RejectionKind::BulkheadFull));
                self.config.instrument.on_rejected(&self.name);
                return self.reject(BreakerError::CircuitBulkheadFull {
                    name: self.name.clone(),
                    limit: self.bulkhead.limit(),
                });
            }
        };

        match self.state_machine.is_call_permitted() {
            Admission::CircuitOpen => {
                drop(permit);
                self.config.storage.record_event(&self.name, Event::rejection(RejectionKind::CircuitOpen));
                let opened_at = self.state_machine.opened_at().unwrap_or_else(clock::now);
                return self.reject(BreakerError::CircuitOpen { name: self.name.clone(), opened_at });
            }
            Admission::HalfOpenSaturated => {
                drop(permit);
                self.config.storage.record_event(&self.name, Event::rejection(RejectionKind::HalfOpenSaturated));
                let opened_at = self.state_machine.opened_at().unwrap_or_else(clock::now);
                return self.reject(BreakerError::CircuitOpen { name: self.name.clone(), opened_at });
            }
            Admission::Permitted => {}
        }

        let start = clock::now();
        let outcome = if attempts.len() > 1 {
            let hedge_attempts: Vec<hedge::Attempt<T, E>> = attempts
                .iter()
                .map(|f| {
                    let f = f.clone();
                    Arc::new(move |_cancel: &CancelToken| f()) as hedge::Attempt<T, E>
                })
                .collect();
            match hedge::race(hedge_attempts, self.config.hedging.delay, self.config.timeout) {
                HedgeOutcome::Success(value) => Ok(value),
                HedgeOutcome::AllFailed(err) => Err(err),
                HedgeOutcome::TimedOut => {
                    drop(permit);
                    let limit_ms = self.config.timeout.map(|d| d.as_millis() as u64).unwrap_or(0);
                    return self.reject(BreakerError::CircuitTimeout { name: self.name.clone(), limit_ms });
                }
            }
        } else {
            (attempts[0])()
        };
        drop(permit);
        let elapsed = clock::now().saturating_duration_since(start);

        match outcome {
            Ok(value) => {
                self.config.storage.record_success(&self.name, elapsed);
                self.config.storage.record_event(&self.name, Event::success(elapsed));
                let window_successes = self.config.storage.success_count(&self.name, self.config.failure_window);
                let success_threshold_met = window_successes >= self.config.success_threshold as u64;
                if self.state_machine.on_success(success_threshold_met) {
                    self.persist_status();
                }
                Ok(value)
            }
            Err(err) => {
                if !self.config.predicate.is_err(&err) {
                    return Err(CallError::Inner(err));
                }
                self.config.storage.record_failure(&self.name, elapsed);
                self.config.storage.record_event(&self.name, Event::failure(elapsed, "operation failed"));
                if self.state_machine.on_failure(self.threshold_exceeded()) {
                    self.persist_status();
                    if let Some(cascade) = &self.cascade {
                        cascade.cascade(&self.name, Registry::global(), self.config.instrument.as_ref());
                    }
                }
                self.fallback_or_raise(CallError::Inner(err))
            }
        }
    }

    fn threshold_exceeded(&self) -> bool {
        match self.config.threshold {
            Threshold::Absolute { failure_threshold } => {
                self.config.storage.failure_count(&self.name, self.config.failure_window) >= failure_threshold as u64
            }
            Threshold::Rate { failure_rate, minimum_calls } => {
                let successes = self.config.storage.success_count(&self.name, self.config.failure_window);
                let failures = self.config.storage.failure_count(&self.name, self.config.failure_window);
                let total = successes + failures;
                total >= minimum_calls as u64 && (failures as f64 / total as f64) >= failure_rate
            }
        }
    }

    fn reject(&self, err: BreakerError<E>) -> Result<T, CallError<E>> {
        self.fallback_or_raise(CallError::Rejected(err))
    }

    fn fallback_or_raise(&self, err: CallError<E>) -> Result<T, CallError<E>> {
        match &self.config.fallback {
            Some(fallback) => fallback.resolve(&err).map_err(CallError::Rejected),
            None => Err(err),
        }
    }
}

impl<T, E> AnyBreaker for Breaker<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CircuitState {
        self.state_machine.state()
    }

    fn force_open(&self) {
        Breaker::force_open(self)
    }

    fn force_close(&self) {
        Breaker::force_close(self)
    }

    fn reset(&self) {
        Breaker::reset(self)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
