//! Cascade coordinator: on tripping, force-opens a declared set of
//! dependent breakers and invokes an emergency hook.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::clock;
use crate::instrument::Instrument;
use crate::registry::Registry;
use crate::state_machine::CircuitState;

/// An emergency hook, invoked once per cascade with the names actually
/// force-opened. Panics are caught and logged, never propagated.
pub type EmergencyHook = Arc<dyn Fn(&[String]) + Send + Sync>;

/// A user `on_cascade` callback, invoked with the source name and the
/// force-opened set.
pub type CascadeCallback = Arc<dyn Fn(&str, &[String]) + Send + Sync>;

/// Cascade bookkeeping for one cascading breaker.
pub struct CascadeInfo {
    dependents: Vec<String>,
    emergency_hook: Option<EmergencyHook>,
    on_cascade: Option<CascadeCallback>,
    first_cascade_at: Mutex<Option<Instant>>,
}

impl CascadeInfo {
    /// Builds cascade bookkeeping for a breaker with the given declared
    /// dependent names.
    pub fn new(
        dependents: Vec<String>,
        emergency_hook: Option<EmergencyHook>,
        on_cascade: Option<CascadeCallback>,
    ) -> Self {
        CascadeInfo { dependents, emergency_hook, on_cascade, first_cascade_at: Mutex::new(None) }
    }

    /// The declared dependent names.
    pub fn dependents(&self) -> &[String] {
        &self.dependents
    }

    /// Runs one cascade: resolves every dependent by name through the
    /// registry, force-opens the ones not already `Open`, then invokes the
    /// emergency hook and `on_cascade` callback with the force-opened set.
    /// Dependents not currently registered are skipped.
    pub fn cascade(&self, source_name: &str, registry: &Registry, instrument: &dyn Instrument) -> Vec<String> {
        let mut opened = Vec::new();
        for name in &self.dependents {
            let Some(dependent) = registry.find_by_name(name) else {
                continue;
            };
            if dependent.state() == CircuitState::Open {
                continue;
            }
            dependent.force_open();
            instrument.on_cascade_failure(source_name, name);
            opened.push(name.clone());
        }

        {
            let mut first = self.first_cascade_at.lock().unwrap();
            if first.is_none() {
                *first = Some(clock::now());
            }
        }

        if !opened.is_empty() {
            if let Some(hook) = &self.emergency_hook {
                let hook = hook.clone();
                let opened_for_hook = opened.clone();
                let result = panic::catch_unwind(AssertUnwindSafe(|| hook(&opened_for_hook)));
                if result.is_err() {
                    tracing::warn!(source = source_name, "emergency hook panicked");
                }
                instrument.on_emergency_protocol_triggered(source_name, &opened);
            }

            if let Some(callback) = &self.on_cascade {
                let callback = callback.clone();
                let source = source_name.to_string();
                let opened_for_cb = opened.clone();
                let result = panic::catch_unwind(AssertUnwindSafe(|| callback(&source, &opened_for_cb)));
                if result.is_err() {
                    tracing::warn!(source = source_name, "on_cascade callback panicked");
                }
            }
        }

        opened
    }

    /// The instant of the first cascade ever triggered by this breaker.
    pub fn first_cascade_at(&self) -> Option<Instant> {
        *self.first_cascade_at.lock().unwrap()
    }
}

impl std::fmt::Debug for CascadeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeInfo")
            .field("dependents", &self.dependents)
            .field("first_cascade_at", &self.first_cascade_at())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::Breaker;
    use crate::config::Config;
    use crate::instrument::NoopInstrument;
    use crate::storage::Null;

    fn register(registry: &Registry, name: &str) -> Arc<Breaker<i32, &'static str>> {
        let breaker = Breaker::new(name, Config::new(Arc::new(Null::new())));
        let handle: std::sync::Weak<dyn AnyBreaker> =
            Arc::downgrade(&(breaker.clone() as Arc<dyn AnyBreaker>));
        registry.register(name, handle);
        breaker
    }

    #[test]
    fn force_opens_closed_and_half_open_dependents_only() {
        let registry = Registry::default();
        let x = register(&registry, "x");
        let y = register(&registry, "y");
        let z = register(&registry, "z");
        x.force_open();

        let info = CascadeInfo::new(vec!["x".into(), "y".into(), "z".into()], None, None);
        let opened = info.cascade("source", &registry, &NoopInstrument);

        assert_eq!(vec!["y".to_string(), "z".to_string()], opened);
        assert_eq!(CircuitState::Open, y.state());
        assert_eq!(CircuitState::Open, z.state());
    }

    #[test]
    fn unresolved_dependents_are_skipped() {
        let registry = Registry::default();
        let info = CascadeInfo::new(vec!["ghost".into()], None, None);
        let opened = info.cascade("source", &registry, &NoopInstrument);
        assert!(opened.is_empty());
    }

    #[test]
    fn emergency_hook_receives_the_force_opened_set() {
        let registry = Registry::default();
        register(&registry, "dep");
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let hook: EmergencyHook = Arc::new(move |names| {
            seen_clone.lock().unwrap().extend_from_slice(names);
        });
        let info = CascadeInfo::new(vec!["dep".into()], Some(hook), None);
        info.cascade("source", &registry, &NoopInstrument);
        assert_eq!(vec!["dep".to_string()], *seen.lock().unwrap());
    }
}
