use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A simple counter that can be incremented atomically
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicUsize,
}

impl Counter {
    /// Create a new counter with an initial value
    pub fn new(initial_value: usize) -> Self {
        Self {
            value: AtomicUsize::new(initial_value),
        }
    }

    /// Increment the counter by a specific amount
    pub fn increment(&self, amount: usize) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Get the current value of the counter
    pub fn value(&self) -> usize {
        self.value.load(Ordering::Relaxed)
    }
}

/// A histogram for tracking distribution of values
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<(f64, AtomicUsize)>,
    count: AtomicUsize,
    sum: AtomicUsize,
    max: AtomicUsize,
}

impl Histogram {
    /// Create a new histogram with specified bucket upper bounds
    pub fn new(bucket_boundaries: &[f64]) -> Self {
        Self {
            buckets: bucket_boundaries
                .iter()
                .map(|&boundary| (boundary, AtomicUsize::new(0)))
                .collect(),
            count: AtomicUsize::new(0),
            sum: AtomicUsize::new(0),
            max: AtomicUsize::new(0),
        }
    }

    /// Create a histogram with exponential buckets
    pub fn exponential(start: f64, factor: f64, count: usize) -> Self {
        let boundaries: Vec<f64> = std::iter::successors(Some(start), |current| Some(current * factor))
            .take(count)
            .collect();
        Self::new(&boundaries)
    }

    /// Record a value in the histogram
    pub fn record(&self, value: f64) {
        let value_as_usize = value as usize;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_as_usize, Ordering::Relaxed);
        self.max.fetch_max(value_as_usize, Ordering::Relaxed);

        for (boundary, counter) in &self.buckets {
            if value <= *boundary {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> usize {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::Relaxed)
    }

    /// Get the mean value
    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }

        self.sum() as f64 / count as f64
    }

    /// Cumulative counts per bucket upper bound
    pub fn buckets(&self) -> Vec<(f64, usize)> {
        self.buckets
            .iter()
            .map(|(boundary, counter)| (*boundary, counter.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Records elapsed microseconds into a histogram when dropped
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    histogram: Arc<Histogram>,
}

impl Timer {
    pub fn new(histogram: Arc<Histogram>) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    /// Get the elapsed time without stopping the timer
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.histogram.record(self.start.elapsed().as_micros() as f64);
    }
}

/// Named counters and histograms
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Arc<Counter>>>,
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a counter
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(counter) = self.counters.read().get(name) {
            return counter.clone();
        }

        self.counters
            .write()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Get or create a histogram with exponential buckets
    pub fn exponential_histogram(&self, name: &str, start: f64, factor: f64, count: usize) -> Arc<Histogram> {
        if let Some(histogram) = self.histograms.read().get(name) {
            return histogram.clone();
        }

        self.histograms
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::exponential(start, factor, count)))
            .clone()
    }

    /// Current value of a counter, 0 if it was never created
    pub fn counter_value(&self, name: &str) -> usize {
        self.counters.read().get(name).map_or(0, |counter| counter.value())
    }

    /// Get metrics as a formatted string
    pub fn format(&self) -> String {
        let mut result = String::new();

        for (name, counter) in self.counters.read().iter() {
            result.push_str(&format!("{}: {}\n", name, counter.value()));
        }

        for (name, histogram) in self.histograms.read().iter() {
            result.push_str(&format!(
                "{}: count={}, sum={}, max={}, mean={:.2}\n",
                name,
                histogram.count(),
                histogram.sum(),
                histogram.max(),
                histogram.mean()
            ));
        }

        result
    }
}

/// The metrics collector for the server
#[derive(Debug, Default)]
pub struct MetricsCollector {
    registry: MetricsRegistry,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    pub fn record_connection(&self) {
        self.registry.counter("connections.accepted").increment(1);
    }

    /// Record the status a request was answered with
    pub fn record_request(&self, method: &str, status: u16) {
        self.registry
            .counter(&format!("requests.{}.{}", method, status))
            .increment(1);
    }

    /// A handler returned an error or panicked
    pub fn record_handler_fault(&self) {
        self.registry.counter("faults.handler").increment(1);
    }

    pub fn record_upstream_failure(&self) {
        self.registry.counter("faults.upstream").increment(1);
    }

    pub fn record_bad_request(&self) {
        self.registry.counter("faults.bad_request").increment(1);
    }

    /// Time a request; the duration is recorded when the timer drops
    pub fn time_request(&self, method: &str) -> Timer {
        // Buckets from 1us to ~8s
        let histogram = self
            .registry
            .exponential_histogram(&format!("request_time.{}", method), 1.0, 2.0, 24);
        Timer::new(histogram)
    }

    /// Get a formatted string of all metrics
    pub fn format(&self) -> String {
        self.registry.format()
    }
}
