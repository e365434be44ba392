//! drift-metrics — observability for the driftwatch scoring service.
//!
//! Holds the process-wide request counters, latency histograms, anomaly
//! counters and the model-loaded gauge, and renders them in the
//! Prometheus text exposition format.
//!
//! # Architecture
//!
//! ```text
//! MetricsRegistry
//!   ├── requests_total{endpoint,method,status}      CounterVec
//!   ├── request_latency_seconds{endpoint}           HistogramVec
//!   ├── anomalies_total{endpoint}                   CounterVec
//!   ├── model_loaded                                Gauge
//!   ├── start_timer() → LatencyTimer (observes on drop)
//!   └── render() → text/plain for /metrics
//! ```
//!
//! The registry is constructed explicitly and shared as `Arc`; tests build
//! their own instance. Series values are atomics, so concurrent writers
//! never lose updates and never block one another once a label set exists.

pub mod family;
pub mod prometheus;
pub mod registry;
pub mod timer;

pub use registry::MetricsRegistry;
pub use timer::LatencyTimer;
