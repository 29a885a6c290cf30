//! Throughput and latency accounting for the scoring pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::info;

/// Metrics collector for pipeline performance.
pub struct PipelineMetrics {
    files_processed: AtomicU64,
    files_failed: AtomicU64,
    rows_scored: AtomicU64,
    /// Run durations in microseconds.
    run_times: RwLock<Vec<u64>>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            files_processed: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            rows_scored: AtomicU64::new(0),
            run_times: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a completed run.
    pub fn record_run(&self, duration: Duration, rows: usize) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
        self.rows_scored.fetch_add(rows as u64, Ordering::Relaxed);

        if let Ok(mut times) = self.run_times.write() {
            times.push(duration.as_micros() as u64);
            // Keep only recent samples for memory efficiency
            if times.len() > 10_000 {
                times.drain(0..5_000);
            }
        }
    }

    /// Record a run that reached the failed state.
    pub fn record_failure(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn files_processed(&self) -> u64 {
        self.files_processed.load(Ordering::Relaxed)
    }

    pub fn files_failed(&self) -> u64 {
        self.files_failed.load(Ordering::Relaxed)
    }

    pub fn rows_scored(&self) -> u64 {
        self.rows_scored.load(Ordering::Relaxed)
    }

    /// Files completed per second since startup.
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.files_processed() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Run duration statistics over the recent samples.
    pub fn run_stats(&self) -> RunStats {
        let times = match self.run_times.read() {
            Ok(times) => times,
            Err(_) => return RunStats::default(),
        };
        if times.is_empty() {
            return RunStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();

        RunStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[((count as f64 * 0.95) as usize).min(count - 1)],
            max_us: *sorted.last().unwrap_or(&0),
        }
    }

    /// Print summary statistics.
    pub fn print_summary(&self) {
        info!(
            files = self.files_processed(),
            failed = self.files_failed(),
            rows = self.rows_scored(),
            throughput = format!("{:.2} files/s", self.throughput()),
            "pipeline summary"
        );

        let stats = self.run_stats();
        if stats.count > 0 {
            info!(
                mean_us = stats.mean_us,
                p50_us = stats.p50_us,
                p95_us = stats.p95_us,
                max_us = stats.max_us,
                "run latency"
            );
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Run duration statistics.
#[derive(Debug, Default)]
pub struct RunStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub max_us: u64,
}

/// Periodic reporter that prints the metrics summary.
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task.
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
