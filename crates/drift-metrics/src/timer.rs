//! Drop guard that records request latency on every exit path.

use std::time::Instant;

use crate::registry::MetricsRegistry;

/// Observes elapsed seconds into `request_latency_seconds` exactly once,
/// either on [`LatencyTimer::stop`] or when dropped.
#[must_use = "latency is recorded when the timer is dropped"]
#[derive(Debug)]
pub struct LatencyTimer<'a> {
    registry: &'a MetricsRegistry,
    endpoint: &'a str,
    started: Instant,
    done: bool,
}

impl<'a> LatencyTimer<'a> {
    pub(crate) fn start(registry: &'a MetricsRegistry, endpoint: &'a str) -> Self {
        Self {
            registry,
            endpoint,
            started: Instant::now(),
            done: false,
        }
    }

    /// Record now and return the elapsed seconds.
    pub fn stop(mut self) -> f64 {
        self.record()
    }

    fn record(&mut self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if !self.done {
            self.done = true;
            self.registry.observe_latency(self.endpoint, secs);
        }
        secs
    }
}

impl Drop for LatencyTimer<'_> {
    fn drop(&mut self) {
        self.record();
    }
}
