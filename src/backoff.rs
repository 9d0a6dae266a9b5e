//! Cool-off computation for the `Open` → `HalfOpen` transition.
//!
//! A pluggable `Backoff` trait narrowed to the one jittered reset-timeout
//! formula this crate needs, while keeping the trait seam so a coordinated
//! or cascading breaker could supply a different strategy without touching
//! the state machine.

use std::time::Duration;

use rand::Rng;

/// Computes the effective cool-off duration for one `Open` episode.
pub trait Backoff: Send + Sync + std::fmt::Debug {
    /// Returns the duration to wait before the next recovery probe is
    /// admitted.
    fn next_delay(&self) -> Duration;
}

/// `reset_timeout × (1 − j + r·j)`, r uniform in `[0,1)`, j =
/// `jitter_factor` clamped to `[0,1]`. Biases the wait downward so that
/// many breakers tripping at once don't all probe recovery in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct EqualJittered {
    reset_timeout: Duration,
    jitter_factor: f64,
}

impl EqualJittered {
    /// Builds a jittered backoff. `jitter_factor` is clamped to `[0, 1]`.
    pub fn new(reset_timeout: Duration, jitter_factor: f64) -> Self {
        EqualJittered {
            reset_timeout,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }
}

impl Backoff for EqualJittered {
    fn next_delay(&self) -> Duration {
        let j = self.jitter_factor;
        let r: f64 = rand::thread_rng().gen_range(0.0..1.0);
        let scale = 1.0 - j + r * j;
        self.reset_timeout.mul_f64(scale.max(0.0))
    }
}

/// A fixed delay, ignoring jitter entirely. Used by tests and by cascade
/// bookkeeping where determinism matters more than herd avoidance.
#[derive(Debug, Clone, Copy)]
pub struct Constant(pub Duration);

impl Backoff for Constant {
    fn next_delay(&self) -> Duration {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_zero_is_exact() {
        let b = EqualJittered::new(Duration::from_secs(10), 0.0);
        for _ in 0..20 {
            assert_eq!(Duration::from_secs(10), b.next_delay());
        }
    }

    #[test]
    fn jitter_biases_downward() {
        let b = EqualJittered::new(Duration::from_secs(10), 1.0);
        for _ in 0..200 {
            let d = b.next_delay();
            assert!(d <= Duration::from_secs(10));
        }
    }

    #[test]
    fn jitter_factor_clamped() {
        let b = EqualJittered::new(Duration::from_secs(10), 5.0);
        let d = b.next_delay();
        assert!(d <= Duration::from_secs(10));
    }

    #[test]
    fn constant_never_varies() {
        let b = Constant(Duration::from_secs(3));
        assert_eq!(Duration::from_secs(3), b.next_delay());
        assert_eq!(Duration::from_secs(3), b.next_delay());
    }
}
