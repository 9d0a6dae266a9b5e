use std::sync::Arc;
use std::time::Duration;

use breakwheel::storage::Flat;
use breakwheel::{Breaker, CallError, CircuitState, Config, Threshold};

/// Closed -> Open -> HalfOpen -> Open -> HalfOpen -> Closed, driven entirely
/// through the public `Breaker` surface against an absolute-threshold trip
/// condition.
#[test]
fn closed_open_half_open_cycle() {
    breakwheel::clock::freeze(|time| {
        let mut config: Config<(), &str> = Config::new(Arc::new(Flat::new()));
        config.threshold = Threshold::Absolute { failure_threshold: 3 };
        config.reset_timeout = Duration::from_secs(5);
        config.jitter_factor = 0.0;
        let breaker = Breaker::new("svc", config);

        for _ in 0..10 {
            assert!(breaker.call(|| Ok::<(), &str>(())).is_ok());
        }
        assert_eq!(CircuitState::Closed, breaker.state());

        for _ in 0..2 {
            assert!(breaker.call(|| Err::<(), _>("boom")).is_err());
        }
        assert_eq!(CircuitState::Closed, breaker.state());

        assert!(breaker.call(|| Err::<(), _>("boom")).is_err());
        assert_eq!(CircuitState::Open, breaker.state());

        for _ in 0..10 {
            match breaker.call(|| Ok::<(), &str>(())) {
                Err(CallError::Rejected(_)) => {}
                other => panic!("expected rejection while open, got {:?}", other),
            }
        }

        time.advance(Duration::from_secs(2));
        assert_eq!(CircuitState::Open, breaker.state());

        time.advance(Duration::from_secs(4));
        assert!(breaker.call(|| Err::<(), _>("boom")).is_err());
        assert_eq!(CircuitState::Open, breaker.state());

        time.advance(Duration::from_secs(10));
        assert!(breaker.call(|| Ok::<(), &str>(())).is_ok());
        assert_eq!(CircuitState::Closed, breaker.state());
    });
}
