//! Metrics collection
//!
//! Prometheus-compatible counters, gauges and latency histograms for:
//! - RPC calls per method
//! - Heartbeats and lease activity
//! - Dead-server removal and re-replication

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
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
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

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
        // stored as microseconds
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
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

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-RPC-method metrics
#[derive(Debug, Default)]
pub struct MethodMetrics {
    pub requests_total: Counter,
    pub requests_error: Counter,
    pub latency: Histogram,
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    methods: Mutex<BTreeMap<String, Arc<MethodMetrics>>>,

    pub heartbeats: Counter,
    pub leases_granted: Counter,
    pub leases_extended: Counter,
    pub dead_servers_removed: Counter,
    pub repairs_succeeded: Counter,
    pub repairs_failed: Counter,
    pub cycles_skipped: Counter,

    /// Snapshot of the last maintenance cycle
    pub live_servers: Gauge,
    pub under_replicated_chunks: Gauge,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            methods: Mutex::new(BTreeMap::new()),
            heartbeats: Counter::new(),
            leases_granted: Counter::new(),
            leases_extended: Counter::new(),
            dead_servers_removed: Counter::new(),
            repairs_succeeded: Counter::new(),
            repairs_failed: Counter::new(),
            cycles_skipped: Counter::new(),
            live_servers: Gauge::new(),
            under_replicated_chunks: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for an RPC method
    pub fn method(&self, name: &str) -> Arc<MethodMetrics> {
        let mut methods = self.methods.lock().unwrap();
        methods
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MethodMetrics::default()))
            .clone()
    }

    pub fn record_rpc(&self, method: &str, duration: Duration, success: bool) {
        let metrics = self.method(method);
        metrics.requests_total.inc();
        metrics.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            metrics.requests_error.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters = [
            ("gfs_heartbeats_total", "Heartbeats received", &self.heartbeats),
            ("gfs_leases_granted_total", "Leases granted", &self.leases_granted),
            ("gfs_leases_extended_total", "Leases extended", &self.leases_extended),
            (
                "gfs_dead_servers_removed_total",
                "Chunkservers declared dead and removed",
                &self.dead_servers_removed,
            ),
            (
                "gfs_repairs_succeeded_total",
                "Successful re-replications",
                &self.repairs_succeeded,
            ),
            (
                "gfs_repairs_failed_total",
                "Failed re-replications",
                &self.repairs_failed,
            ),
            (
                "gfs_maintenance_cycles_skipped_total",
                "Maintenance ticks skipped while a cycle was running",
                &self.cycles_skipped,
            ),
        ];
        for (name, help, counter) in counters {
            writeln!(out, "# HELP {} {}", name, help).unwrap();
            writeln!(out, "# TYPE {} counter", name).unwrap();
            writeln!(out, "{} {}", name, counter.get()).unwrap();
        }

        let gauges = [
            ("gfs_live_servers", "Live chunkservers", &self.live_servers),
            (
                "gfs_under_replicated_chunks",
                "Chunks below the replication target at the last cycle",
                &self.under_replicated_chunks,
            ),
        ];
        for (name, help, gauge) in gauges {
            writeln!(out, "# HELP {} {}", name, help).unwrap();
            writeln!(out, "# TYPE {} gauge", name).unwrap();
            writeln!(out, "{} {}", name, gauge.get()).unwrap();
        }

        out.push_str("# HELP gfs_uptime_seconds Master uptime in seconds\n");
        out.push_str("# TYPE gfs_uptime_seconds gauge\n");
        writeln!(out, "gfs_uptime_seconds {}", self.uptime_seconds()).unwrap();

        let methods = self.methods.lock().unwrap();

        out.push_str("# HELP gfs_rpc_requests_total Requests per RPC method\n");
        out.push_str("# TYPE gfs_rpc_requests_total counter\n");
        for (method, metrics) in methods.iter() {
            writeln!(
                out,
                "gfs_rpc_requests_total{{method=\"{}\"}} {}",
                method,
                metrics.requests_total.get()
            )
            .unwrap();
        }

        out.push_str("# HELP gfs_rpc_errors_total Errors per RPC method\n");
        out.push_str("# TYPE gfs_rpc_errors_total counter\n");
        for (method, metrics) in methods.iter() {
            writeln!(
                out,
                "gfs_rpc_errors_total{{method=\"{}\"}} {}",
                method,
                metrics.requests_error.get()
            )
            .unwrap();
        }

        out.push_str("# HELP gfs_rpc_duration_ms RPC duration in milliseconds\n");
        out.push_str("# TYPE gfs_rpc_duration_ms histogram\n");
        for (method, metrics) in methods.iter() {
            for (le, count) in metrics.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                writeln!(
                    out,
                    "gfs_rpc_duration_ms_bucket{{method=\"{}\",le=\"{}\"}} {}",
                    method, le, count
                )
                .unwrap();
            }
            writeln!(
                out,
                "gfs_rpc_duration_ms_sum{{method=\"{}\"}} {}",
                method,
                metrics.latency.sum()
            )
            .unwrap();
            writeln!(
                out,
                "gfs_rpc_duration_ms_count{{method=\"{}\"}} {}",
                method,
                metrics.latency.count()
            )
            .unwrap();
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);
