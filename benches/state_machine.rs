#![deny(warnings)]

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use breakwheel::storage::Flat;
use breakwheel::{Breaker, Config, Threshold};

#[allow(clippy::unit_arg)]
fn absolute_threshold_admission(c: &mut Criterion) {
    let mut config: Config<(), ()> = Config::new(Arc::new(Flat::new()));
    config.threshold = Threshold::Absolute { failure_threshold: 3 };
    config.reset_timeout = Duration::from_secs(5);
    let breaker = Breaker::new("bench-absolute", config);

    c.bench_function("absolute_threshold_admission", |b| {
        b.iter(|| {
            black_box(breaker.call(|| Ok(())).ok());
        })
    });
}

#[allow(clippy::unit_arg)]
fn rate_threshold_over_time_window(c: &mut Criterion) {
    let mut config: Config<(), ()> = Config::new(Arc::new(Flat::new()));
    config.threshold = Threshold::Rate { failure_rate: 0.5, minimum_calls: 10 };
    config.failure_window = Duration::from_secs(10);
    let breaker = Breaker::new("bench-rate", config);

    c.bench_function("rate_threshold_over_time_window", |b| {
        b.iter(|| {
            black_box(breaker.call(|| Err(())).err());
        })
    });
}

criterion_group!(benches, absolute_threshold_admission, rate_threshold_over_time_window);
criterion_main!(benches);
