//! Process-wide breaker registry.
//!
//! A `dashmap`-backed by-name index over weak references, mirroring the
//! concurrency choice the pack's other service registries make for
//! finer-grained locking than one global `Mutex<HashMap<..>>`. Breakers are
//! heterogeneous in `T`/`E`, so entries are stored behind a type-erased
//! `AnyBreaker` and recovered with `Arc::downcast` in `get_or_create`.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::breaker::Breaker;
use crate::clock;
use crate::state_machine::{CircuitState, DependencyGuard};

/// A type-erased handle to a live `Breaker<T, E>`, for code (the registry,
/// the cascade coordinator) that must operate on breakers without knowing
/// their call/error types.
pub trait AnyBreaker: Send + Sync + fmt::Debug {
    /// The breaker's name.
    fn name(&self) -> &str;
    /// The breaker's current state.
    fn state(&self) -> CircuitState;
    /// `ForceOpen`.
    fn force_open(&self);
    /// `ForceClose`.
    fn force_close(&self);
    /// `Reset`.
    fn reset(&self);
    /// Recovers the concrete `Arc<Breaker<T, E>>` behind this handle.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct Slot {
    handle: Weak<dyn AnyBreaker>,
    created_at: Instant,
}

/// The process-wide breaker registry. Use `Registry::global()`. Entries are
/// keyed by name in a `DashMap`, so two breakers with different names never
/// contend on the same shard lock.
#[derive(Default)]
pub struct Registry {
    by_name: DashMap<String, Vec<Slot>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.by_name.len())
            .finish_non_exhaustive()
    }
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::default);

/// Per-state, per-name counts across every live breaker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    /// Total live breakers.
    pub total: usize,
    /// Count currently `Closed`.
    pub closed: usize,
    /// Count currently `Open`.
    pub open: usize,
    /// Count currently `HalfOpen`.
    pub half_open: usize,
    /// Count of live breakers per name.
    pub by_name: HashMap<String, usize>,
}

/// One row of `Registry::detailed_report`, a per-breaker companion to the
/// aggregate `StatsSnapshot`.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerReport {
    /// The breaker's name.
    pub name: String,
    /// Its current state.
    pub state: CircuitState,
}

impl Registry {
    /// The process-wide singleton.
    pub fn global() -> &'static Registry {
        &REGISTRY
    }

    /// Registers a breaker under `name`. The registry holds only a weak
    /// reference; the breaker is dropped from the index once its last
    /// strong reference is gone.
    pub fn register(&self, name: &str, handle: Weak<dyn AnyBreaker>) {
        let mut entries = self.by_name.entry(name.to_string()).or_default();
        entries.retain(|s| s.handle.upgrade().is_some());
        entries.push(Slot { handle, created_at: clock::now() });
    }

    /// Removes the entry matching `handle`'s identity under `name`, if any.
    pub fn unregister(&self, name: &str, handle: &Arc<dyn AnyBreaker>) {
        if let Some(mut entries) = self.by_name.get_mut(name) {
            entries.retain(|s| match s.handle.upgrade() {
                Some(existing) => !Arc::ptr_eq(&existing, handle),
                None => false,
            });
        }
        self.by_name.retain(|_, entries| !entries.is_empty());
    }

    /// A snapshot of every live breaker.
    pub fn enumerate(&self) -> Vec<Arc<dyn AnyBreaker>> {
        let mut out = Vec::new();
        for mut entry in self.by_name.iter_mut() {
            entry.value_mut().retain(|s| match s.handle.upgrade() {
                Some(arc) => {
                    out.push(arc);
                    true
                }
                None => false,
            });
        }
        out
    }

    /// The first live breaker registered under `name`.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<dyn AnyBreaker>> {
        self.find_all_by_name(name).into_iter().next()
    }

    /// Every live breaker registered under `name`.
    pub fn find_all_by_name(&self, name: &str) -> Vec<Arc<dyn AnyBreaker>> {
        match self.by_name.get_mut(name) {
            Some(mut entries) => {
                let mut out = Vec::new();
                entries.retain(|s| match s.handle.upgrade() {
                    Some(arc) => {
                        out.push(arc);
                        true
                    }
                    None => false,
                });
                out
            }
            None => Vec::new(),
        }
    }

    /// Force-opens every live breaker named `name`; returns how many.
    pub fn force_open_by_name(&self, name: &str) -> usize {
        let found = self.find_all_by_name(name);
        for b in &found {
            b.force_open();
        }
        found.len()
    }

    /// Force-closes every live breaker named `name`; returns how many.
    pub fn force_close_by_name(&self, name: &str) -> usize {
        let found = self.find_all_by_name(name);
        for b in &found {
            b.force_close();
        }
        found.len()
    }

    /// Resets every live breaker named `name`; returns how many.
    pub fn reset_by_name(&self, name: &str) -> usize {
        let found = self.find_all_by_name(name);
        for b in &found {
            b.reset();
        }
        found.len()
    }

    /// Counts by state and by name, across every live breaker.
    pub fn summary(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::default();
        for breaker in self.enumerate() {
            snapshot.total += 1;
            match breaker.state() {
                CircuitState::Closed => snapshot.closed += 1,
                CircuitState::Open => snapshot.open += 1,
                CircuitState::HalfOpen => snapshot.half_open += 1,
            }
            *snapshot.by_name.entry(breaker.name().to_string()).or_insert(0) += 1;
        }
        snapshot
    }

    /// One row per live breaker.
    pub fn detailed_report(&self) -> Vec<BreakerReport> {
        self.enumerate()
            .into_iter()
            .map(|b| BreakerReport { name: b.name().to_string(), state: b.state() })
            .collect()
    }

    /// Returns the existing live breaker named `name` with matching `T`/`E`,
    /// or builds one with `make` and registers it. A name previously held by
    /// a now-dead weak reference, or by a breaker of a different `T`/`E`, is
    /// replaced.
    pub fn get_or_create<T, E, F>(&self, name: &str, make: F) -> Arc<Breaker<T, E>>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Arc<Breaker<T, E>>,
    {
        for candidate in self.find_all_by_name(name) {
            if let Ok(typed) = Arc::<dyn Any + Send + Sync>::downcast::<Breaker<T, E>>(candidate.as_any()) {
                return typed;
            }
        }
        let breaker = make();
        let handle: Weak<dyn AnyBreaker> = Arc::downgrade(&breaker) as Weak<dyn AnyBreaker>;
        self.register(name, handle);
        breaker
    }

    /// Drops entries that are dead, or alive but older than `age` — named
    /// dynamic breakers created through `get_or_create` that have simply
    /// aged out.
    pub fn evict_older_than(&self, age: Duration) {
        let now = clock::now();
        for mut entry in self.by_name.iter_mut() {
            entry
                .value_mut()
                .retain(|s| s.handle.upgrade().is_some() && now.saturating_duration_since(s.created_at) < age);
        }
        self.by_name.retain(|_, entries| !entries.is_empty());
    }
}

/// A `DependencyGuard` for the coordinated variant: gates recovery and
/// reset on a declared set of peer breakers resolved by name through the
/// registry. A dependency this guard cannot resolve by name is treated as
/// permissive.
#[derive(Debug)]
pub struct RegistryGuard {
    dependencies: Vec<String>,
}

impl RegistryGuard {
    /// Builds a guard over the given dependency names, checked against
    /// `Registry::global()`.
    pub fn new(dependencies: Vec<String>) -> Self {
        RegistryGuard { dependencies }
    }

    fn states(&self) -> impl Iterator<Item = CircuitState> + '_ {
        self.dependencies
            .iter()
            .filter_map(|name| Registry::global().find_by_name(name))
            .map(|dep| dep.state())
    }
}

impl DependencyGuard for RegistryGuard {
    fn attempt_recovery_allowed(&self) -> bool {
        self.states().all(|state| state != CircuitState::Open)
    }

    fn reset_allowed(&self) -> bool {
        self.states().all(|state| state != CircuitState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::Null;
    use std::sync::Arc;

    fn breaker(name: &str) -> Arc<Breaker<i32, &'static str>> {
        Breaker::new(name, Config::new(Arc::new(Null::new())))
    }

    #[test]
    fn register_find_and_force_open_by_name() {
        let registry = Registry::default();
        let b = breaker("svc-registry-1");
        registry.register(b.name(), Arc::downgrade(&(b.clone() as Arc<dyn AnyBreaker>)));
        assert!(registry.find_by_name("svc-registry-1").is_some());
        assert_eq!(1, registry.force_open_by_name("svc-registry-1"));
        assert_eq!(CircuitState::Open, b.state());
    }

    #[test]
    fn dead_weak_refs_are_compacted_on_enumerate() {
        let registry = Registry::default();
        {
            let b = breaker("svc-registry-2");
            registry.register(b.name(), Arc::downgrade(&(b.clone() as Arc<dyn AnyBreaker>)));
        }
        assert!(registry.find_by_name("svc-registry-2").is_none());
    }

    #[test]
    fn get_or_create_returns_the_same_instance() {
        let registry = Registry::default();
        let a = registry.get_or_create("svc-registry-3", || breaker("svc-registry-3"));
        let b = registry.get_or_create("svc-registry-3", || breaker("svc-registry-3"));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn summary_counts_by_state() {
        let registry = Registry::default();
        let b = breaker("svc-registry-4");
        registry.register(b.name(), Arc::downgrade(&(b.clone() as Arc<dyn AnyBreaker>)));
        b.force_open();
        let summary = registry.summary();
        assert_eq!(1, summary.open);
        assert_eq!(1, summary.total);
    }
}
