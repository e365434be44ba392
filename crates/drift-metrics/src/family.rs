//! Metric families: labeled counters, labeled histograms, and a gauge.
//!
//! Each family owns its series behind an `RwLock<BTreeMap<..>>`. Updating
//! an existing series only takes the read lock; the write lock is taken
//! once per new label set. Map ordering gives deterministic exposition.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use tracing::warn;

use crate::prometheus;

type LabelValues = Vec<String>;

/// Static description shared by every family.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

impl Descriptor {
    fn accepts(&self, values: &[&str]) -> bool {
        if values.len() == self.labels.len() {
            return true;
        }
        warn!(
            metric = self.name,
            expected = self.labels.len(),
            got = values.len(),
            "label arity mismatch, update dropped"
        );
        false
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn owned(values: &[&str]) -> LabelValues {
    values.iter().map(|v| (*v).to_string()).collect()
}

// ── Counter ────────────────────────────────────────────────────────

/// Monotonic counters keyed by label values.
#[derive(Debug)]
pub struct CounterVec {
    desc: Descriptor,
    series: RwLock<BTreeMap<LabelValues, AtomicU64>>,
}

impl CounterVec {
    pub fn new(desc: Descriptor) -> Self {
        Self {
            desc,
            series: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn inc(&self, values: &[&str]) {
        self.inc_by(values, 1);
    }

    pub fn inc_by(&self, values: &[&str], n: u64) {
        if !self.desc.accepts(values) {
            return;
        }
        {
            let series = read(&self.series);
            if let Some(counter) = series.get(&owned(values)) {
                counter.fetch_add(n, Ordering::Relaxed);
                return;
            }
        }
        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);
        series
            .entry(owned(values))
            .or_default()
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Current value for one label set; zero if never touched.
    pub fn get(&self, values: &[&str]) -> u64 {
        read(&self.series)
            .get(&owned(values))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn render_into(&self, out: &mut String) {
        prometheus::write_header(out, &self.desc, "counter");
        for (values, counter) in read(&self.series).iter() {
            prometheus::write_sample(
                out,
                self.desc.name,
                &prometheus::labels(self.desc.labels, values, None),
                &counter.load(Ordering::Relaxed).to_string(),
            );
        }
    }
}

// ── Histogram ──────────────────────────────────────────────────────

#[derive(Debug)]
struct HistogramSeries {
    /// Per-bucket (non-cumulative) counts; the last slot is `+Inf`.
    buckets: Vec<AtomicU64>,
    /// `f64` bits.
    sum: AtomicU64,
    count: AtomicU64,
}

impl HistogramSeries {
    fn new(n_bounds: usize) -> Self {
        Self {
            buckets: (0..=n_bounds).map(|_| AtomicU64::new(0)).collect(),
            sum: AtomicU64::new(0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, slot: usize, value: f64) {
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
        // fetch_update only fails if the closure returns None.
        let _ = self
            .sum
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Histograms with fixed bucket bounds, keyed by label values.
#[derive(Debug)]
pub struct HistogramVec {
    desc: Descriptor,
    bounds: Vec<f64>,
    series: RwLock<BTreeMap<LabelValues, HistogramSeries>>,
}

impl HistogramVec {
    /// Non-finite bounds are dropped; the rest are sorted and deduplicated.
    pub fn new(desc: Descriptor, bounds: &[f64]) -> Self {
        let mut bounds: Vec<f64> = bounds.iter().copied().filter(|b| b.is_finite()).collect();
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        Self {
            desc,
            bounds,
            series: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    pub fn observe(&self, values: &[&str], value: f64) {
        if !self.desc.accepts(values) {
            return;
        }
        if !value.is_finite() || value < 0.0 {
            warn!(metric = self.desc.name, value, "ignoring invalid observation");
            return;
        }
        // First bound with value <= bound; past the end is +Inf.
        let slot = self.bounds.partition_point(|b| *b < value);
        {
            let series = read(&self.series);
            if let Some(h) = series.get(&owned(values)) {
                h.observe(slot, value);
                return;
            }
        }
        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);
        series
            .entry(owned(values))
            .or_insert_with(|| HistogramSeries::new(self.bounds.len()))
            .observe(slot, value);
    }

    /// Observation count for one label set.
    pub fn count(&self, values: &[&str]) -> u64 {
        read(&self.series)
            .get(&owned(values))
            .map_or(0, |h| h.count.load(Ordering::Relaxed))
    }

    pub fn render_into(&self, out: &mut String) {
        prometheus::write_header(out, &self.desc, "histogram");
        let bucket_name = format!("{}_bucket", self.desc.name);
        let sum_name = format!("{}_sum", self.desc.name);
        let count_name = format!("{}_count", self.desc.name);

        for (values, h) in read(&self.series).iter() {
            let mut cumulative = 0u64;
            for (i, slot) in h.buckets.iter().enumerate() {
                cumulative += slot.load(Ordering::Relaxed);
                let le = self
                    .bounds
                    .get(i)
                    .map_or_else(|| "+Inf".to_string(), |b| prometheus::format_float(*b));
                prometheus::write_sample(
                    out,
                    &bucket_name,
                    &prometheus::labels(self.desc.labels, values, Some(&le)),
                    &cumulative.to_string(),
                );
            }
            let labels = prometheus::labels(self.desc.labels, values, None);
            let sum = f64::from_bits(h.sum.load(Ordering::Relaxed));
            prometheus::write_sample(out, &sum_name, &labels, &prometheus::format_float(sum));
            // The +Inf bucket and _count must agree within one scrape.
            prometheus::write_sample(out, &count_name, &labels, &cumulative.to_string());
        }
    }
}

// ── Gauge ──────────────────────────────────────────────────────────

/// A single unlabeled value that can go up and down.
#[derive(Debug)]
pub struct Gauge {
    desc: Descriptor,
    bits: AtomicU64,
}

impl Gauge {
    pub fn new(desc: Descriptor) -> Self {
        Self {
            desc,
            bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn render_into(&self, out: &mut String) {
        prometheus::write_header(out, &self.desc, "gauge");
        prometheus::write_sample(out, self.desc.name, "", &prometheus::format_float(self.get()));
    }
}
