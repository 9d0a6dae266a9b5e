//! A bounded-attempt retry helper.
//!
//! Deliberately outside the breaker core: it never reads or writes breaker
//! state, never trips or resets anything, and a caller is free to wrap
//! `Breaker::call` with it or not — retry policy is not the breaker's
//! concern.

/// Calls `f` up to `max_attempts` times, returning the first success. If
/// every attempt fails, returns the last error observed.
pub fn retry<F, T, E>(max_attempts: u32, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
{
    assert!(max_attempts >= 1, "max_attempts must be at least 1");
    let mut last_err = None;
    for _ in 0..max_attempts {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_first_success() {
        let mut calls = 0;
        let result = retry(3, || {
            calls += 1;
            Ok::<_, &str>(calls)
        });
        assert_eq!(Ok(1), result);
        assert_eq!(1, calls);
    }

    #[test]
    fn retries_until_success() {
        let mut calls = 0;
        let result = retry(5, || {
            calls += 1;
            if calls < 3 {
                Err("not yet")
            } else {
                Ok(calls)
            }
        });
        assert_eq!(Ok(3), result);
    }

    #[test]
    fn exhausts_and_returns_last_error() {
        let mut calls = 0;
        let result: Result<i32, &str> = retry(3, || {
            calls += 1;
            Err("nope")
        });
        assert_eq!(Err("nope"), result);
        assert_eq!(3, calls);
    }
}
