use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use breakwheel::storage::Flat;
use breakwheel::{AnyBreaker, Breaker, CallError, CircuitState, Config, Registry, Threshold};

fn flat_config<T, E>(threshold: Threshold) -> Config<T, E>
where
    E: 'static,
{
    let mut config = Config::new(Arc::new(Flat::new()));
    config.threshold = threshold;
    config.jitter_factor = 0.0;
    config
}

#[test]
fn rate_threshold_trips_exactly_at_the_boundary() {
    let config: Config<(), &str> =
        flat_config(Threshold::Rate { failure_rate: 0.5, minimum_calls: 4 });
    let breaker = Breaker::new("rate-svc", config);

    assert!(breaker.call(|| Ok::<(), &str>(())).is_ok());
    assert!(breaker.call(|| Err::<(), _>("boom")).is_err());
    assert_eq!(CircuitState::Closed, breaker.state(), "below minimum_calls, never evaluated");

    assert!(breaker.call(|| Ok::<(), &str>(())).is_ok());
    assert!(breaker.call(|| Err::<(), _>("boom")).is_err());
    assert_eq!(CircuitState::Open, breaker.state(), "2/4 == 0.5 trips at the boundary");
}

#[test]
fn bulkhead_rejects_once_the_permit_limit_is_reached() {
    let mut config: Config<(), &str> = flat_config(Threshold::Absolute { failure_threshold: 1000 });
    config.max_concurrent = Some(1);
    let breaker = Breaker::new("bulkhead-svc", config);

    let (tx, rx) = std::sync::mpsc::channel::<()>();
    let release = Arc::new(std::sync::Mutex::new(Some(rx)));
    let holder = breaker.clone();
    let release_for_thread = release.clone();
    let handle = std::thread::spawn(move || {
        holder.call(move || {
            let rx = release_for_thread.lock().unwrap().take().unwrap();
            rx.recv().ok();
            Ok::<(), &str>(())
        })
    });

    // Give the in-flight call a moment to acquire its permit.
    std::thread::sleep(Duration::from_millis(50));
    match breaker.call(|| Ok::<(), &str>(())) {
        Err(CallError::Rejected(breakwheel::BreakerError::CircuitBulkheadFull { limit, .. })) => {
            assert_eq!(1, limit)
        }
        other => panic!("expected bulkhead rejection, got {:?}", other),
    }

    tx.send(()).unwrap();
    handle.join().unwrap().unwrap();
}

#[test]
fn hedging_returns_the_fastest_backend() {
    let mut config: Config<&'static str, &str> =
        flat_config(Threshold::Absolute { failure_threshold: 1000 });
    config.hedging.delay = Duration::from_millis(15);
    let breaker = Breaker::new("hedge-svc", config);

    let result = breaker.call_hedged(vec![
        || {
            std::thread::sleep(Duration::from_millis(200));
            Ok::<_, &str>("slow")
        },
        || {
            std::thread::sleep(Duration::from_millis(10));
            Ok::<_, &str>("fast")
        },
    ]);
    assert_eq!(Ok("fast"), result);
}

#[test]
fn cascade_force_opens_declared_dependents_on_trip() {
    let registry = Registry::default();
    let dependent = Breaker::new(
        "downstream",
        flat_config::<(), &str>(Threshold::Absolute { failure_threshold: 1000 }),
    );
    registry.register(
        dependent.name(),
        Arc::downgrade(&(dependent.clone() as Arc<dyn AnyBreaker>)),
    );

    // `Breaker::new` also registers into the process-wide Registry::global(),
    // but this test asserts against its own private registry instead, since
    // the global one is shared across the whole test binary.
    assert_eq!(1, registry.force_open_by_name("downstream"));
    assert_eq!(CircuitState::Open, dependent.state());
    assert_eq!(0, registry.force_open_by_name("nonexistent"));
}

#[test]
fn concurrent_calls_never_exceed_the_half_open_probe_budget() {
    let mut config: Config<(), &str> = flat_config(Threshold::Absolute { failure_threshold: 1 });
    config.half_open_calls = 2;
    config.reset_timeout = Duration::from_millis(50);
    let breaker = Breaker::new("half-open-svc", config);
    assert!(breaker.call(|| Err::<(), _>("boom")).is_err());
    assert_eq!(CircuitState::Open, breaker.state());
    std::thread::sleep(Duration::from_millis(150));

    // Every thread holds the same operation, which sleeps well past the
    // point the whole fleet has raced `is_call_permitted`, so closing the
    // circuit from an early success can't race ahead of the cap check.
    let permitted = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let breaker = breaker.clone();
            let permitted = permitted.clone();
            std::thread::spawn(move || {
                let outcome = breaker.call(|| {
                    std::thread::sleep(Duration::from_millis(100));
                    Ok::<(), &str>(())
                });
                if outcome.is_ok() {
                    permitted.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(permitted.load(Ordering::SeqCst) <= 2);
}
