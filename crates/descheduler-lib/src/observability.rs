//! Prometheus metrics for the descheduling loop
//!
//! Metrics register once into the process-global registry; the handle is a
//! cheap clone. The binary exposes them on `/metrics`.

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;

/// Cycle durations span sub-second dry runs to multi-minute large clusters
const CYCLE_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 60.0, 300.0];

static GLOBAL_METRICS: OnceLock<DeschedulerMetricsInner> = OnceLock::new();

struct DeschedulerMetricsInner {
    cycles_total: IntCounter,
    cycle_duration_seconds: Histogram,
    evictions_total: IntCounter,
    eviction_failures_total: IntCounter,
    last_cycle_evicted: IntGauge,
}

impl DeschedulerMetricsInner {
    fn new() -> Self {
        Self {
            cycles_total: register_int_counter!(
                "descheduler_cycles_total",
                "Number of descheduling cycles executed"
            )
            .expect("Failed to register cycles_total"),

            cycle_duration_seconds: register_histogram!(
                "descheduler_cycle_duration_seconds",
                "Wall-clock duration of descheduling cycles",
                CYCLE_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            evictions_total: register_int_counter!(
                "descheduler_evictions_total",
                "Pods evicted (or logged in dry-run mode) across all cycles"
            )
            .expect("Failed to register evictions_total"),

            eviction_failures_total: register_int_counter!(
                "descheduler_eviction_failures_total",
                "Eviction API calls that returned an error"
            )
            .expect("Failed to register eviction_failures_total"),

            last_cycle_evicted: register_int_gauge!(
                "descheduler_last_cycle_evicted",
                "Pods evicted during the most recent cycle"
            )
            .expect("Failed to register last_cycle_evicted"),
        }
    }
}

/// Handle to the global descheduler metrics
#[derive(Clone)]
pub struct DeschedulerMetrics {
    _private: (),
}

impl Default for DeschedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DeschedulerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DeschedulerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DeschedulerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record the outcome of one completed cycle
    pub fn record_cycle(&self, duration_secs: f64, evicted: u64, failed: u64) {
        let inner = self.inner();
        inner.cycles_total.inc();
        inner.cycle_duration_seconds.observe(duration_secs);
        inner.evictions_total.inc_by(evicted);
        inner.eviction_failures_total.inc_by(failed);
        inner.last_cycle_evicted.set(evicted as i64);
    }
}
