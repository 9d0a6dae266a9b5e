//! Instrumentation sinks.
//!
//! One event per breaker lifecycle moment. Storage-specific events are
//! covered separately by `storage::chain::ChainInstrument`, since a
//! breaker's storage handle may be shared across many breakers and
//! instrumented independently of any one breaker's lifecycle.

/// Breaker-level instrumentation events.
///
/// `NoopInstrument` keeps the hot path free of any sink overhead, useful
/// in benches; `TracingInstrument` is the default `Config::new` installs.
pub trait Instrument: Send + Sync + std::fmt::Debug {
    /// The breaker transitioned to `Open`.
    fn on_open(&self, _name: &str) {}
    /// The breaker transitioned to `Closed`.
    fn on_closed(&self, _name: &str) {}
    /// The breaker transitioned to `HalfOpen`.
    fn on_half_open(&self, _name: &str) {}
    /// A call was rejected without running.
    fn on_rejected(&self, _name: &str) {}
    /// A cascade force-opened one dependent.
    fn on_cascade_failure(&self, _source: &str, _dependent: &str) {}
    /// A cascade's emergency hook was invoked.
    fn on_emergency_protocol_triggered(&self, _source: &str, _dependents: &[String]) {}
}

/// Discards every event. The cheapest possible instrument.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInstrument;

impl Instrument for NoopInstrument {}

/// Emits one `tracing` record per event, at `info` for state transitions and
/// `warn` for rejections and cascades.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInstrument;

impl Instrument for TracingInstrument {
    fn on_open(&self, name: &str) {
        tracing::warn!(breaker = name, "opened");
    }

    fn on_closed(&self, name: &str) {
        tracing::info!(breaker = name, "closed");
    }

    fn on_half_open(&self, name: &str) {
        tracing::info!(breaker = name, "half_opened");
    }

    fn on_rejected(&self, name: &str) {
        tracing::warn!(breaker = name, "rejected");
    }

    fn on_cascade_failure(&self, source: &str, dependent: &str) {
        tracing::warn!(source, dependent, "cascade_failure");
    }

    fn on_emergency_protocol_triggered(&self, source: &str, dependents: &[String]) {
        tracing::warn!(source, ?dependents, "emergency_protocol_triggered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_instrument_is_inert() {
        let instrument = NoopInstrument;
        instrument.on_open("svc");
        instrument.on_closed("svc");
    }

    #[test]
    fn tracing_instrument_implements_every_event() {
        let instrument = TracingInstrument;
        instrument.on_open("svc");
        instrument.on_half_open("svc");
        instrument.on_rejected("svc");
        instrument.on_cascade_failure("svc", "dep");
        instrument.on_emergency_protocol_triggered("svc", &["dep".to_string()]);
        instrument.on_closed("svc");
    }
}
