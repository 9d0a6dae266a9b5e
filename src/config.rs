//! A breaker's immutable configuration.
//!
//! A declarative fluent builder surface is out of scope here, so `Config`
//! is plain data instead, built by struct update syntax from `Config::new`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cascade::{CascadeCallback, EmergencyHook};
use crate::error::BreakerError;
use crate::fallback::Fallback;
use crate::failure_predicate::{Any, FailurePredicate};
use crate::instrument::{Instrument, TracingInstrument};
use crate::storage::Storage;

/// How the sliding-window threshold decides to trip.
#[derive(Debug, Clone, Copy)]
pub enum Threshold {
    /// Trip once `failure_threshold` failures land within the window.
    Absolute {
        /// Failures required to trip.
        failure_threshold: u32,
    },
    /// Trip once `failure_rate` of calls in the window are failures, once
    /// at least `minimum_calls` have been observed.
    Rate {
        /// Failure ratio in `[0, 1]` that trips the breaker.
        failure_rate: f64,
        /// Calls required in-window before the rate is evaluated.
        minimum_calls: u32,
    },
}

/// Hedged-execution settings.
#[derive(Debug, Clone, Copy)]
pub struct HedgeConfig {
    /// Whether `call` races redundant attempts at all.
    pub enabled: bool,
    /// Stagger between successive attempt starts.
    pub delay: Duration,
    /// Number of attempts to race when no distinct backends are supplied.
    pub max_requests: u32,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        HedgeConfig { enabled: false, delay: Duration::from_millis(50), max_requests: 1 }
    }
}

/// A breaker's full, immutable configuration. Construct via `Config::new`
/// and struct-update syntax (`Config { timeout: Some(..), ..base }`); there
/// is deliberately no fluent builder.
pub struct Config<T, E> {
    /// Sliding-window trip condition.
    pub threshold: Threshold,
    /// Trailing window the threshold is evaluated over.
    pub failure_window: Duration,
    /// Successes required in `HalfOpen` (via window count) to close early.
    pub success_threshold: u32,
    /// Probe budget while `HalfOpen`.
    pub half_open_calls: u32,
    /// Base cool-off before the first recovery probe.
    pub reset_timeout: Duration,
    /// Jitter applied to `reset_timeout`, clamped to `[0, 1]`.
    pub jitter_factor: f64,
    /// Advisory deadline, honored by hedging and storage `with_timeout`,
    /// never by aborting the call in flight.
    pub timeout: Option<Duration>,
    /// Bulkhead permit limit; `None` means unlimited.
    pub max_concurrent: Option<usize>,
    /// Hedged-execution settings.
    pub hedging: HedgeConfig,
    /// Classifies which of the caller's errors count as `Failure`.
    pub predicate: Arc<dyn FailurePredicate<E>>,
    /// What to return instead of a rejected or recorded-failure call.
    pub fallback: Option<Fallback<T, E>>,
    /// Instrumentation sink.
    pub instrument: Arc<dyn Instrument>,
    /// Names of dependent breakers force-opened when this one trips.
    pub cascade_dependents: Vec<String>,
    /// An emergency hook invoked once per cascade, with the force-opened set.
    pub emergency_hook: Option<EmergencyHook>,
    /// A user callback invoked once per cascade, with the source name and
    /// the force-opened set.
    pub on_cascade: Option<CascadeCallback>,
    /// Names of peer breakers this breaker's recovery and reset are gated
    /// on (the coordinated variant).
    pub dependencies: Vec<String>,
    /// Storage handle shared by this breaker (and possibly others).
    pub storage: Arc<dyn Storage>,
}

impl<T, E> fmt::Debug for Config<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("threshold", &self.threshold)
            .field("failure_window", &self.failure_window)
            .field("success_threshold", &self.success_threshold)
            .field("half_open_calls", &self.half_open_calls)
            .field("reset_timeout", &self.reset_timeout)
            .field("jitter_factor", &self.jitter_factor)
            .field("timeout", &self.timeout)
            .field("max_concurrent", &self.max_concurrent)
            .field("hedging", &self.hedging)
            .field("cascade_dependents", &self.cascade_dependents)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl<T, E> Config<T, E>
where
    E: 'static,
{
    /// A reasonable default configuration over `storage`: absolute
    /// threshold of 5 failures in a 60s window, 1 half-open probe, 30s base
    /// reset with 0.5 jitter, no fallback, `Any` failure predicate,
    /// `TracingInstrument`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Config {
            threshold: Threshold::Absolute { failure_threshold: 5 },
            failure_window: Duration::from_secs(60),
            success_threshold: 1,
            half_open_calls: 1,
            reset_timeout: Duration::from_secs(30),
            jitter_factor: 0.5,
            timeout: None,
            max_concurrent: None,
            hedging: HedgeConfig::default(),
            predicate: Arc::new(Any),
            fallback: None,
            instrument: Arc::new(TracingInstrument),
            cascade_dependents: Vec::new(),
            emergency_hook: None,
            on_cascade: None,
            dependencies: Vec::new(),
            storage,
        }
    }

    /// Validates the configuration, returning `ConfigurationInvalid` for
    /// values that would make threshold evaluation or hedging meaningless.
    pub fn validate(&self) -> Result<(), BreakerError<E>> {
        if let Threshold::Rate { failure_rate, minimum_calls } = self.threshold {
            if !(0.0..=1.0).contains(&failure_rate) {
                return Err(BreakerError::ConfigurationInvalid {
                    reason: format!("failure_rate {failure_rate} is outside [0, 1]"),
                });
            }
            if minimum_calls == 0 {
                return Err(BreakerError::ConfigurationInvalid {
                    reason: "minimum_calls must be at least 1".to_string(),
                });
            }
        }
        if self.half_open_calls == 0 {
            return Err(BreakerError::ConfigurationInvalid {
                reason: "half_open_calls must be at least 1".to_string(),
            });
        }
        if self.hedging.enabled && self.hedging.max_requests == 0 {
            return Err(BreakerError::ConfigurationInvalid {
                reason: "hedging.max_requests must be at least 1 when enabled".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Null;

    #[test]
    fn default_config_is_valid() {
        let config: Config<(), &str> = Config::new(Arc::new(Null::new()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rate_threshold_outside_unit_interval_is_invalid() {
        let mut config: Config<(), &str> = Config::new(Arc::new(Null::new()));
        config.threshold = Threshold::Rate { failure_rate: 1.5, minimum_calls: 10 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_half_open_calls_is_invalid() {
        let mut config: Config<(), &str> = Config::new(Arc::new(Null::new()));
        config.half_open_calls = 0;
        assert!(config.validate().is_err());
    }
}
