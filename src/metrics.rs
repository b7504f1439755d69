//! Hook run metrics
//!
//! Instruments are created lazily on the global meter. Without an installed
//! meter provider they are no-ops.

use std::time::Duration;

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("posthook"));

/// Counter of hook invocations
///
/// Labels:
/// - `hook`: hook name
/// - `result`: completed, skipped, unconfirmed, error
pub static HOOK_RUNS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("posthook_runs_total")
        .with_description("Total number of hook invocations by result")
        .with_unit("{runs}")
        .build()
});

/// Histogram of hook duration
///
/// Labels:
/// - `hook`: hook name
pub static HOOK_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("posthook_duration_seconds")
        .with_description("Duration of hook invocations in seconds")
        .with_unit("s")
        .build()
});

/// Record one finished hook invocation
pub fn record_hook(hook: &str, result: &'static str, elapsed: Duration) {
    HOOK_RUNS.add(
        1,
        &[
            KeyValue::new("hook", hook.to_string()),
            KeyValue::new("result", result),
        ],
    );
    HOOK_DURATION.record(
        elapsed.as_secs_f64(),
        &[KeyValue::new("hook", hook.to_string())],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_a_provider_is_harmless() {
        record_hook("StoreKubeConfig", "completed", Duration::from_millis(250));
        record_hook("StoreKubeConfig", "error", Duration::ZERO);
    }
}
