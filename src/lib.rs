//! breakwheel is a circuit breaker core: a named breaker wraps calls to an
//! unreliable collaborator, observes their outcomes against a sliding
//! window, and trips to reject further calls once a failure threshold is
//! crossed, resuming through a half-open probe once a jittered cool-off
//! elapses.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use breakwheel::{Breaker, CallError, Config};
//! use breakwheel::storage::Flat;
//!
//! fn dangerous_call() -> Result<(), &'static str> {
//!     Err("downstream unavailable")
//! }
//!
//! let breaker = Breaker::new("downstream", Config::new(Arc::new(Flat::new())));
//!
//! for _ in 0..10 {
//!     match breaker.call(dangerous_call) {
//!         Err(CallError::Inner(_)) => eprintln!("failed"),
//!         Err(CallError::Rejected(_)) => {
//!             eprintln!("rejected");
//!             break;
//!         }
//!         Ok(()) => {}
//!     }
//! }
//! ```
//!
//! Or with custom thresholds and a fallback:
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use breakwheel::{Breaker, Config, Fallback, Threshold};
//! use breakwheel::storage::Flat;
//!
//! fn circuit_breaker() -> Arc<Breaker<i32, &'static str>> {
//!     let mut config = Config::new(Arc::new(Flat::new()));
//!     config.threshold = Threshold::Rate { failure_rate: 0.5, minimum_calls: 20 };
//!     config.reset_timeout = Duration::from_secs(10);
//!     config.fallback = Some(Fallback::Value(0));
//!     Breaker::new("downstream", config)
//! }
//! ```

#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(warnings))]

mod breaker;
mod bulkhead;
mod cascade;
mod config;
mod error;
mod fallback;
mod hedge;
mod instrument;
mod registry;
mod state_machine;

pub mod backoff;
pub mod failure_predicate;
pub mod retry;
pub mod storage;

#[doc(hidden)]
pub mod clock;

pub use self::breaker::{Breaker, BreakerStats};
pub use self::bulkhead::{Bulkhead, Permit};
pub use self::cascade::{CascadeCallback, CascadeInfo, EmergencyHook};
pub use self::config::{Config, HedgeConfig, Threshold};
pub use self::error::{BreakerError, CallError};
pub use self::fallback::Fallback;
pub use self::failure_predicate::FailurePredicate;
pub use self::hedge::{CancelToken, HedgeOutcome};
pub use self::instrument::{Instrument, NoopInstrument, TracingInstrument};
pub use self::registry::{AnyBreaker, BreakerReport, Registry, RegistryGuard, StatsSnapshot};
pub use self::state_machine::{Admission, CircuitState, DependencyGuard, Unguarded};
