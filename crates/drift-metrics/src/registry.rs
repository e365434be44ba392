//! The service's metric registry.
//!
//! One instance per process, built at startup from the monitoring config
//! and shared by every request. Recording never fails and never panics.

use crate::family::{CounterVec, Descriptor, Gauge, HistogramVec};
use crate::timer::LatencyTimer;

pub const REQUESTS_TOTAL: &str = "requests_total";
pub const REQUEST_LATENCY_SECONDS: &str = "request_latency_seconds";
pub const ANOMALIES_TOTAL: &str = "anomalies_total";
pub const MODEL_LOADED: &str = "model_loaded";

/// Default latency bucket bounds, in seconds.
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0];

#[derive(Debug)]
pub struct MetricsRegistry {
    requests: CounterVec,
    latency: HistogramVec,
    anomalies: CounterVec,
    model_loaded: Gauge,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_BUCKETS)
    }
}

impl MetricsRegistry {
    pub fn new(latency_buckets: &[f64]) -> Self {
        Self {
            requests: CounterVec::new(Descriptor {
                name: REQUESTS_TOTAL,
                help: "Total HTTP requests.",
                labels: &["endpoint", "method", "status"],
            }),
            latency: HistogramVec::new(
                Descriptor {
                    name: REQUEST_LATENCY_SECONDS,
                    help: "Request latency in seconds.",
                    labels: &["endpoint"],
                },
                latency_buckets,
            ),
            anomalies: CounterVec::new(Descriptor {
                name: ANOMALIES_TOTAL,
                help: "Total anomalies detected.",
                labels: &["endpoint"],
            }),
            model_loaded: Gauge::new(Descriptor {
                name: MODEL_LOADED,
                help: "Whether the model is loaded (1) or not (0).",
                labels: &[],
            }),
        }
    }

    // ── Recording ──────────────────────────────────────────────────

    pub fn increment_request(&self, endpoint: &str, method: &str, status: u16) {
        self.requests.inc(&[endpoint, method, &status.to_string()]);
    }

    pub fn observe_latency(&self, endpoint: &str, seconds: f64) {
        self.latency.observe(&[endpoint], seconds);
    }

    /// Add `count` anomalies for `endpoint`. Zero is a no-op that still
    /// materializes the series.
    pub fn increment_anomalies(&self, endpoint: &str, count: u64) {
        self.anomalies.inc_by(&[endpoint], count);
    }

    pub fn set_model_loaded(&self, loaded: bool) {
        self.model_loaded.set(if loaded { 1.0 } else { 0.0 });
    }

    /// Start timing a request; latency is observed when the timer drops.
    pub fn start_timer<'a>(&'a self, endpoint: &'a str) -> LatencyTimer<'a> {
        LatencyTimer::start(self, endpoint)
    }

    // ── Reading ────────────────────────────────────────────────────

    pub fn request_count(&self, endpoint: &str, method: &str, status: u16) -> u64 {
        self.requests.get(&[endpoint, method, &status.to_string()])
    }

    pub fn anomaly_count(&self, endpoint: &str) -> u64 {
        self.anomalies.get(&[endpoint])
    }

    pub fn latency_count(&self, endpoint: &str) -> u64 {
        self.latency.count(&[endpoint])
    }

    pub fn model_loaded(&self) -> bool {
        self.model_loaded.get() > 0.0
    }

    /// Render every family in registration order.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(2048);
        self.requests.render_into(&mut out);
        self.latency.render_into(&mut out);
        self.anomalies.render_into(&mut out);
        self.model_loaded.render_into(&mut out);
        out
    }
}
