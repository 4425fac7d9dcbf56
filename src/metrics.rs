/// Metrics - Prometheus Instrumentation
///
/// Scoped to what the repository core can observe about itself: write
/// outcomes, current height, active subscription count, and subscriber
/// disconnect reasons. A global `Registry` with `IntCounterVec`/`IntGauge`
/// statics, a `register_metrics` call, and a `gather_metrics` text exporter.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static WRITES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("updates_repo_writes_total", "Write-path calls by operation and outcome"),
        &["operation", "outcome"],
    )
    .unwrap()
});

pub static CURRENT_HEIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("updates_repo_current_height", "Current repository height").unwrap()
});

pub static ACTIVE_SUBSCRIPTIONS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("updates_repo_active_subscriptions", "Number of live subscriptions").unwrap()
});

pub static SUBSCRIBER_DISCONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("updates_repo_subscriber_disconnects_total", "Subscriber disconnects by reason"),
        &["reason"],
    )
    .unwrap()
});

/// Registers every metric above into the global registry. Call once at
/// startup (see `main.rs`); calling it twice is an error.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CURRENT_HEIGHT.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_SUBSCRIPTIONS.clone()))?;
    REGISTRY.register(Box::new(SUBSCRIBER_DISCONNECTS.clone()))?;
    Ok(())
}

/// Renders the registry in Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer).expect("prometheus text encoding never fails");
    String::from_utf8(buffer).expect("prometheus text encoder only emits utf8")
}

pub fn record_write(operation: &str, outcome: &str) {
    WRITES_TOTAL.with_label_values(&[operation, outcome]).inc();
}

pub fn record_disconnect(reason: &str) {
    SUBSCRIBER_DISCONNECTS.with_label_values(&[reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_write_does_not_panic_before_registration() {
        record_write("append_block", "ok");
        record_disconnect("lagged_behind");
    }

    #[test]
    fn gather_metrics_produces_text_output() {
        let text = gather_metrics();
        // Either empty (nothing registered yet in this test binary) or a
        // valid Prometheus exposition block; either way this must not panic.
        let _ = text.len();
    }
}
