//! Fallback specification for rejected or failed calls.

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use crate::error::{BreakerError, CallError};

/// What to return in place of a failed or rejected call.
///
/// Resolves against a `CallError<E>` rather than a bare `E`, so the same
/// fallback can cover both an operation failure and a boundary rejection
/// (circuit open, bulkhead full, hedge deadline) uniformly.
///
/// `T` and `E` must be `Clone` because a `Fallback` is shared, immutable
/// configuration (`Config` is held behind an `Arc` and called many times),
/// so resolving one can never consume it.
pub enum Fallback<T, E> {
    /// Always returns the same value.
    Value(T),
    /// Computes a value from the triggering error.
    Compute(Arc<dyn Fn(&CallError<E>) -> T + Send + Sync>),
    /// Tries each candidate in order, returning the first that succeeds.
    Sequence(Vec<Fallback<T, E>>),
    /// Races every candidate concurrently; first success wins. If all fail,
    /// raises `ParallelFallbackFailed` carrying every candidate's error.
    Parallel(Vec<Fallback<T, E>>),
}

impl<T, E> fmt::Debug for Fallback<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Value(_) => f.debug_tuple("Value").field(&"..").finish(),
            Fallback::Compute(_) => f.debug_tuple("Compute").field(&"..").finish(),
            Fallback::Sequence(candidates) => {
                f.debug_tuple("Sequence").field(&candidates.len()).finish()
            }
            Fallback::Parallel(candidates) => {
                f.debug_tuple("Parallel").field(&candidates.len()).finish()
            }
        }
    }
}

impl<T, E> Fallback<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Resolves this fallback against the error (or rejection) that
    /// triggered it.
    pub fn resolve(&self, err: &CallError<E>) -> Result<T, BreakerError<E>> {
        match self {
            Fallback::Value(value) => Ok(value.clone()),
            Fallback::Compute(f) => Ok(f(err)),
            Fallback::Sequence(candidates) => {
                let mut last_err = None;
                for candidate in candidates {
                    match candidate.resolve(err) {
                        Ok(value) => return Ok(value),
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(last_err.unwrap_or(BreakerError::StorageExhausted))
            }
            Fallback::Parallel(candidates) => self.resolve_parallel(candidates, err),
        }
    }

    fn resolve_parallel(
        &self,
        candidates: &[Fallback<T, E>],
        err: &CallError<E>,
    ) -> Result<T, BreakerError<E>> {
        if candidates.is_empty() {
            return Err(BreakerError::ParallelFallbackFailed {
                errors: Vec::new(),
                _marker: std::marker::PhantomData,
            });
        }

        // Each candidate runs `resolve` on its own thread, racing over a
        // channel so the first arrival wins regardless of declaration
        // order; only `Compute` candidates with real work behind them
        // benefit, but the shape is uniform across all fallback kinds.
        let (tx, rx) = mpsc::channel();
        for candidate in candidates {
            let err = err.clone();
            let candidate = candidate.clone_boxed();
            let tx = tx.clone();
            thread::spawn(move || {
                let result = candidate.resolve(&err);
                let _ = tx.send(result);
            });
        }
        drop(tx);

        let mut errors = Vec::new();
        let mut received = 0;
        while received < candidates.len() {
            match rx.recv() {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(BreakerError::ParallelFallbackFailed { errors: mut inner, .. })) => {
                    received += 1;
                    errors.append(&mut inner);
                }
                Ok(Err(e)) => {
                    received += 1;
                    errors.push(e);
                }
                Err(_) => break,
            }
        }
        Err(BreakerError::ParallelFallbackFailed {
            errors,
            _marker: std::marker::PhantomData,
        })
    }

    fn clone_boxed(&self) -> Fallback<T, E> {
        match self {
            Fallback::Value(value) => Fallback::Value(value.clone()),
            Fallback::Compute(f) => Fallback::Compute(f.clone()),
            Fallback::Sequence(candidates) => {
                Fallback::Sequence(candidates.iter().map(Fallback::clone_boxed).collect())
            }
            Fallback::Parallel(candidates) => {
                Fallback::Parallel(candidates.iter().map(Fallback::clone_boxed).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boom() -> CallError<&'static str> {
        CallError::Inner("boom")
    }

    #[test]
    fn value_ignores_the_error() {
        let fb: Fallback<i32, &str> = Fallback::Value(7);
        assert_eq!(7, fb.resolve(&boom()).unwrap());
    }

    #[test]
    fn compute_uses_the_error() {
        let fb: Fallback<String, &str> =
            Fallback::Compute(Arc::new(|e: &CallError<&str>| format!("was: {e}")));
        assert_eq!("was: boom", fb.resolve(&boom()).unwrap());
    }

    #[test]
    fn sequence_returns_first_success() {
        let fb: Fallback<i32, &str> = Fallback::Sequence(vec![Fallback::Value(1), Fallback::Value(2)]);
        assert_eq!(1, fb.resolve(&boom()).unwrap());
    }

    #[test]
    fn sequence_exhausted_fails() {
        let fb: Fallback<i32, &str> = Fallback::Sequence(vec![]);
        assert!(fb.resolve(&boom()).is_err());
    }

    #[test]
    fn parallel_returns_one_of_the_candidates() {
        let fb: Fallback<i32, &str> = Fallback::Parallel(vec![Fallback::Value(1), Fallback::Value(2)]);
        let value = fb.resolve(&boom()).unwrap();
        assert!(value == 1 || value == 2);
    }

    #[test]
    fn parallel_with_no_candidates_fails() {
        let fb: Fallback<i32, &str> = Fallback::Parallel(vec![]);
        assert!(fb.resolve(&boom()).is_err());
    }

    #[test]
    fn parallel_returns_whichever_candidate_arrives_first() {
        let slow = Fallback::Compute(Arc::new(|_: &CallError<&str>| {
            std::thread::sleep(std::time::Duration::from_millis(100));
            1
        }));
        let fast = Fallback::Compute(Arc::new(|_: &CallError<&str>| 2));
        let fb: Fallback<i32, &str> = Fallback::Parallel(vec![slow, fast]);
        assert_eq!(2, fb.resolve(&boom()).unwrap());
    }
}
