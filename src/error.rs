//! Boundary error taxonomy: rejection reasons and the call-site `Inner`/
//! `Rejected` split.

use std::fmt;
use std::time::Instant;

/// A typed rejection raised at the breaker boundary, distinct from the
/// caller's own error type `E`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the call was rejected without being attempted.
    #[error("circuit `{name}` is open (opened at {opened_at:?})")]
    CircuitOpen {
        /// Name of the breaker that rejected the call.
        name: String,
        /// Monotonic instant at which the breaker entered `Open`.
        opened_at: Instant,
    },

    /// The bulkhead's concurrency limit was reached.
    #[error("circuit `{name}` bulkhead is full (limit={limit})")]
    CircuitBulkheadFull {
        /// Name of the breaker that rejected the call.
        name: String,
        /// Configured `max_concurrent` limit.
        limit: usize,
    },

    /// A hedged call's overall deadline elapsed before any attempt succeeded.
    #[error("circuit `{name}` timed out after {limit_ms}ms")]
    CircuitTimeout {
        /// Name of the breaker that timed out.
        name: String,
        /// The deadline, in milliseconds.
        limit_ms: u64,
    },

    /// A coordinated breaker's guard could not be satisfied because a
    /// declared dependency was not in an acceptable state.
    #[error("circuit `{name}` has an unmet dependency")]
    CircuitDependencyUnmet {
        /// Name of the breaker whose guard failed.
        name: String,
    },

    /// The supplied `Config` failed validation.
    #[error("circuit configuration is invalid: {reason}")]
    ConfigurationInvalid {
        /// Human-readable reason.
        reason: String,
    },

    /// A storage backend returned an error for a non-timeout reason.
    #[error("storage error: {reason}")]
    StorageError {
        /// Human-readable reason.
        reason: String,
    },

    /// A storage backend's `with_timeout` deadline elapsed.
    #[error("storage operation timed out after {limit_ms}ms")]
    StorageTimeout {
        /// The deadline, in milliseconds.
        limit_ms: u64,
    },

    /// Every backend in a fallback chain failed or was unhealthy.
    #[error("all storage backends exhausted")]
    StorageExhausted,

    /// A parallel fallback set raced concurrently and every candidate
    /// failed.
    #[error("all {} parallel fallbacks failed", .errors.len())]
    ParallelFallbackFailed {
        /// The collected errors, one per raced candidate.
        errors: Vec<BreakerError<E>>,
        /// Zero-sized marker so `E` is not used only recursively.
        #[doc(hidden)]
        _marker: std::marker::PhantomData<E>,
    },
}

impl<E> BreakerError<E> {
    /// Maps the caller error type carried by `ParallelFallbackFailed`,
    /// leaving every other variant untouched.
    pub fn map_err<F, E2>(self, f: F) -> BreakerError<E2>
    where
        F: Fn(E) -> E2 + Clone,
    {
        match self {
            BreakerError::ParallelFallbackFailed { errors, .. } => {
                BreakerError::ParallelFallbackFailed {
                    errors: errors.into_iter().map(|e| e.map_err(f.clone())).collect(),
                    _marker: std::marker::PhantomData,
                }
            }
            BreakerError::CircuitOpen { name, opened_at } => {
                BreakerError::CircuitOpen { name, opened_at }
            }
            BreakerError::CircuitBulkheadFull { name, limit } => {
                BreakerError::CircuitBulkheadFull { name, limit }
            }
            BreakerError::CircuitTimeout { name, limit_ms } => {
                BreakerError::CircuitTimeout { name, limit_ms }
            }
            BreakerError::CircuitDependencyUnmet { name } => {
                BreakerError::CircuitDependencyUnmet { name }
            }
            BreakerError::ConfigurationInvalid { reason } => {
                BreakerError::ConfigurationInvalid { reason }
            }
            BreakerError::StorageError { reason } => BreakerError::StorageError { reason },
            BreakerError::StorageTimeout { limit_ms } => BreakerError::StorageTimeout { limit_ms },
            BreakerError::StorageExhausted => BreakerError::StorageExhausted,
        }
    }
}

/// The result of a protected call: either the caller's own error (the
/// operation ran and failed) or a `BreakerError` raised at the boundary
/// (the operation never ran, or a hedged/fallback deadline expired).
///
/// The `Inner`/`Rejected` split keeps the two cases matchable without
/// collapsing a caller's own error type into the boundary's rejection
/// reasons.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError<E> {
    /// The operation ran and returned an error matching the failure
    /// predicate.
    Inner(E),
    /// The call was rejected at the boundary without running, or a
    /// fallback also failed.
    Rejected(BreakerError<E>),
}

impl<E> fmt::Display for CallError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Inner(err) => write!(f, "{}", err),
            CallError::Rejected(err) => write!(f, "{}", err),
        }
    }
}

impl<E> std::error::Error for CallError<E> where E: std::error::Error {}

impl<E> From<BreakerError<E>> for CallError<E> {
    fn from(err: BreakerError<E>) -> Self {
        CallError::Rejected(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_wraps_inner() {
        let err: CallError<&str> = CallError::Inner("boom");
        assert_eq!("boom", err.to_string());
    }

    #[test]
    fn display_wraps_rejected() {
        let err: CallError<&str> = CallError::Rejected(BreakerError::CircuitBulkheadFull {
            name: "svc".into(),
            limit: 4,
        });
        assert!(err.to_string().contains("bulkhead is full"));
    }
}
