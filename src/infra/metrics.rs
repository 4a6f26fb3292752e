//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::anomaly::{AnomalyKind, ANOMALY_KINDS};
use crate::domain::types::TouristStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

const NUM_BUCKETS: usize = METRICS_NUM_BUCKETS;
const NUM_KINDS: usize = ANOMALY_KINDS.len();

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total updates ever processed (monotonic)
    updates_total: AtomicU64,
    /// Updates since last report (reset on report)
    updates_since_report: AtomicU64,
    /// Sum of processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max processing latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Update processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Ingest messages received by the listener (before try_send)
    ingest_received: AtomicU64,
    /// Ingest messages dropped due to channel full
    ingest_dropped: AtomicU64,
    /// Updates rejected for invalid geometry
    invalid_updates_total: AtomicU64,
    /// Zone containment matches (monotonic)
    zone_matches_total: AtomicU64,
    /// Alert-triggering zone matches (monotonic)
    zone_alerts_total: AtomicU64,
    /// Anomaly records by detector kind (monotonic)
    anomalies_total: [AtomicU64; NUM_KINDS],
    /// Detector failures (monotonic)
    detector_failures_total: AtomicU64,
    /// Incident dispatch events (monotonic)
    dispatches_total: AtomicU64,
    /// Explicit panic signals (monotonic)
    panics_total: AtomicU64,
    /// External acknowledgments (monotonic)
    acks_total: AtomicU64,
    /// Batch sweeps completed (monotonic)
    sweeps_total: AtomicU64,
    /// Currently tracked tourists (gauge, set by the monitor)
    active_tourists: AtomicU64,
    /// Tourists per status: safe / at_risk / emergency (gauges)
    status_counts: [AtomicU64; 3],
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            updates_total: AtomicU64::new(0),
            updates_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            ingest_received: AtomicU64::new(0),
            ingest_dropped: AtomicU64::new(0),
            invalid_updates_total: AtomicU64::new(0),
            zone_matches_total: AtomicU64::new(0),
            zone_alerts_total: AtomicU64::new(0),
            anomalies_total: std::array::from_fn(|_| AtomicU64::new(0)),
            detector_failures_total: AtomicU64::new(0),
            dispatches_total: AtomicU64::new(0),
            panics_total: AtomicU64::new(0),
            acks_total: AtomicU64::new(0),
            sweeps_total: AtomicU64::new(0),
            active_tourists: AtomicU64::new(0),
            status_counts: std::array::from_fn(|_| AtomicU64::new(0)),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record an update was processed with given latency (lock-free)
    #[inline]
    pub fn record_update_processed(&self, latency_us: u64) {
        self.updates_total.fetch_add(1, Ordering::Relaxed);
        self.updates_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_ingest_received(&self) {
        self.ingest_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ingest_dropped(&self) {
        self.ingest_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invalid_update(&self) {
        self.invalid_updates_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record zone containment matches; `alerting` counts the subset that
    /// triggered an alert
    #[inline]
    pub fn record_zone_matches(&self, matches: u64, alerting: u64) {
        self.zone_matches_total.fetch_add(matches, Ordering::Relaxed);
        self.zone_alerts_total.fetch_add(alerting, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_anomaly(&self, kind: AnomalyKind) {
        self.anomalies_total[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_detector_failure(&self) {
        self.detector_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dispatch(&self) {
        self.dispatches_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_panic(&self) {
        self.panics_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ack(&self) {
        self.acks_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sweep(&self) {
        self.sweeps_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Gauge updates from the monitor's sweep
    pub fn set_population(&self, active: u64, safe: u64, at_risk: u64, emergency: u64) {
        self.active_tourists.store(active, Ordering::Relaxed);
        self.status_counts[0].store(safe, Ordering::Relaxed);
        self.status_counts[1].store(at_risk, Ordering::Relaxed);
        self.status_counts[2].store(emergency, Ordering::Relaxed);
    }

    #[inline]
    pub fn updates_total(&self) -> u64 {
        self.updates_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn status_count(&self, status: TouristStatus) -> u64 {
        let idx = match status {
            TouristStatus::Safe => 0,
            TouristStatus::AtRisk => 1,
            TouristStatus::Emergency => 2,
        };
        self.status_counts[idx].load(Ordering::Relaxed)
    }

    /// Produce a summary, resetting the windowed counters
    pub fn report(&self) -> MetricsSummary {
        let mut last_report = self.last_report_time.lock();
        let elapsed = last_report.elapsed();
        *last_report = Instant::now();
        drop(last_report);

        let window_updates = self.updates_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let avg_latency_us =
            if window_updates > 0 { latency_sum / window_updates } else { 0 };
        let updates_per_sec = if elapsed.as_secs_f64() > 0.0 {
            window_updates as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let mut anomalies = [0u64; NUM_KINDS];
        for (i, counter) in self.anomalies_total.iter().enumerate() {
            anomalies[i] = counter.load(Ordering::Relaxed);
        }

        let received = self.ingest_received.load(Ordering::Relaxed);
        let dropped = self.ingest_dropped.load(Ordering::Relaxed);

        MetricsSummary {
            updates_total: self.updates_total.load(Ordering::Relaxed),
            updates_per_sec,
            avg_latency_us,
            max_latency_us: latency_max,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            ingest_received: received,
            ingest_dropped: dropped,
            ingest_drop_ratio: if received > 0 { dropped as f64 / received as f64 } else { 0.0 },
            invalid_updates: self.invalid_updates_total.load(Ordering::Relaxed),
            zone_matches: self.zone_matches_total.load(Ordering::Relaxed),
            zone_alerts: self.zone_alerts_total.load(Ordering::Relaxed),
            anomalies,
            detector_failures: self.detector_failures_total.load(Ordering::Relaxed),
            dispatches: self.dispatches_total.load(Ordering::Relaxed),
            panics: self.panics_total.load(Ordering::Relaxed),
            acks: self.acks_total.load(Ordering::Relaxed),
            sweeps: self.sweeps_total.load(Ordering::Relaxed),
            active_tourists: self.active_tourists.load(Ordering::Relaxed),
            safe_tourists: self.status_counts[0].load(Ordering::Relaxed),
            at_risk_tourists: self.status_counts[1].load(Ordering::Relaxed),
            emergency_tourists: self.status_counts[2].load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time summary produced by `Metrics::report`
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub updates_total: u64,
    pub updates_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub ingest_received: u64,
    pub ingest_dropped: u64,
    pub ingest_drop_ratio: f64,
    pub invalid_updates: u64,
    pub zone_matches: u64,
    pub zone_alerts: u64,
    pub anomalies: [u64; NUM_KINDS],
    pub detector_failures: u64,
    pub dispatches: u64,
    pub panics: u64,
    pub acks: u64,
    pub sweeps: u64,
    pub active_tourists: u64,
    pub safe_tourists: u64,
    pub at_risk_tourists: u64,
    pub emergency_tourists: u64,
}

impl MetricsSummary {
    /// Anomaly totals as (kind, count) pairs in reporting order
    pub fn anomalies_by_kind(&self) -> impl Iterator<Item = (AnomalyKind, u64)> + '_ {
        ANOMALY_KINDS.iter().copied().zip(self.anomalies.iter().copied())
    }

    pub fn anomalies_total(&self) -> u64 {
        self.anomalies.iter().sum()
    }

    /// Log the summary as a single structured event
    pub fn log(&self) {
        info!(
            updates_total = %self.updates_total,
            updates_per_sec = %format!("{:.1}", self.updates_per_sec),
            avg_latency_us = %self.avg_latency_us,
            p99_latency_us = %self.lat_p99_us,
            active_tourists = %self.active_tourists,
            at_risk = %self.at_risk_tourists,
            emergency = %self.emergency_tourists,
            zone_matches = %self.zone_matches,
            anomalies = %self.anomalies_total(),
            detector_failures = %self.detector_failures,
            dispatches = %self.dispatches,
            ingest_dropped = %self.ingest_dropped,
            "metrics_report"
        );
    }
}
