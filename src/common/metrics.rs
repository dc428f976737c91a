//! Replication metrics
//!
//! Prometheus-compatible counters and latency histograms for:
//! - Coordinated operations (per operation kind)
//! - Quorum failures, schema barrier timeouts, delete conflicts
//! - Read repair (scheduled, committed, failed, dropped)

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default latency buckets
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    /// Create a histogram with custom bucket boundaries
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored as microseconds for precision
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative buckets, `+Inf` last
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per operation kind metrics
#[derive(Debug, Default)]
pub struct OperationMetrics {
    pub total: Counter,
    pub success: Counter,
    pub error: Counter,
    pub latency: Histogram,
}

/// Metrics of one coordinator
#[derive(Debug)]
pub struct ReplicationMetrics {
    operations: Mutex<HashMap<&'static str, Arc<OperationMetrics>>>,

    pub quorum_failures: Counter,
    pub schema_timeouts: Counter,
    pub delete_conflicts: Counter,

    pub repairs_scheduled: Counter,
    pub repairs_committed: Counter,
    pub repairs_superseded: Counter,
    pub repairs_failed: Counter,
    pub repairs_dropped: Counter,
    pub repairs_in_flight: Gauge,

    start_time: Instant,
}

impl ReplicationMetrics {
    pub fn new() -> Self {
        Self {
            operations: Mutex::new(HashMap::new()),
            quorum_failures: Counter::new(),
            schema_timeouts: Counter::new(),
            delete_conflicts: Counter::new(),
            repairs_scheduled: Counter::new(),
            repairs_committed: Counter::new(),
            repairs_superseded: Counter::new(),
            repairs_failed: Counter::new(),
            repairs_dropped: Counter::new(),
            repairs_in_flight: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for an operation kind
    pub fn operation(&self, op: &'static str) -> Arc<OperationMetrics> {
        let mut ops = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        ops.entry(op).or_default().clone()
    }

    /// Record a finished operation
    pub fn record(&self, op: &'static str, duration: Duration, success: bool) {
        let m = self.operation(op);
        m.total.inc();
        m.latency.observe(duration.as_secs_f64() * 1000.0);
        if success {
            m.success.inc();
        } else {
            m.error.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters: [(&str, &str, u64); 8] = [
            (
                "replikv_quorum_failures_total",
                "Operations that did not reach their consistency level",
                self.quorum_failures.get(),
            ),
            (
                "replikv_schema_timeouts_total",
                "Writes rejected because the local schema lagged",
                self.schema_timeouts.get(),
            ),
            (
                "replikv_delete_conflicts_total",
                "Delete conflicts surfaced without automated resolution",
                self.delete_conflicts.get(),
            ),
            (
                "replikv_repairs_scheduled_total",
                "Read repair tasks scheduled",
                self.repairs_scheduled.get(),
            ),
            (
                "replikv_repairs_committed_total",
                "Read repair writes applied by a replica",
                self.repairs_committed.get(),
            ),
            (
                "replikv_repairs_superseded_total",
                "Read repair writes the target already superseded",
                self.repairs_superseded.get(),
            ),
            (
                "replikv_repairs_failed_total",
                "Read repair writes that failed",
                self.repairs_failed.get(),
            ),
            (
                "replikv_repairs_dropped_total",
                "Read repairs dropped because the repair queue was full",
                self.repairs_dropped.get(),
            ),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        out.push_str("# HELP replikv_repairs_in_flight Background repair tasks running\n");
        out.push_str("# TYPE replikv_repairs_in_flight gauge\n");
        let _ = writeln!(out, "replikv_repairs_in_flight {}", self.repairs_in_flight.get());

        out.push_str("# HELP replikv_uptime_seconds Coordinator uptime in seconds\n");
        out.push_str("# TYPE replikv_uptime_seconds gauge\n");
        let _ = writeln!(out, "replikv_uptime_seconds {}", self.uptime_seconds());

        let mut ops: Vec<(&'static str, Arc<OperationMetrics>)> = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, m)| (*name, m.clone()))
            .collect();
        ops.sort_by_key(|(name, _)| *name);

        out.push_str("# HELP replikv_operations_total Coordinated operations\n");
        out.push_str("# TYPE replikv_operations_total counter\n");
        for (name, m) in &ops {
            let _ = writeln!(
                out,
                "replikv_operations_total{{op=\"{}\",result=\"success\"}} {}",
                name,
                m.success.get()
            );
            let _ = writeln!(
                out,
                "replikv_operations_total{{op=\"{}\",result=\"error\"}} {}",
                name,
                m.error.get()
            );
        }

        out.push_str("# HELP replikv_operation_duration_ms Operation duration in milliseconds\n");
        out.push_str("# TYPE replikv_operation_duration_ms histogram\n");
        for (name, m) in &ops {
            for (le, count) in m.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "replikv_operation_duration_ms_bucket{{op=\"{}\",le=\"{}\"}} {}",
                    name, le, count
                );
            }
            let _ = writeln!(
                out,
                "replikv_operation_duration_ms_sum{{op=\"{}\"}} {}",
                name,
                m.latency.sum()
            );
            let _ = writeln!(
                out,
                "replikv_operation_duration_ms_count{{op=\"{}\"}} {}",
                name,
                m.latency.count()
            );
        }

        out
    }
}

impl Default for ReplicationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
