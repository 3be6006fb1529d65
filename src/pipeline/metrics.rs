//! Run progress counters and periodic reporting.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for a batch run.
#[derive(Debug)]
pub struct Metrics {
    /// Rows published and written back as successes
    pub rows_succeeded: AtomicU64,

    /// Rows that failed with a permanent cause
    pub rows_failed_permanent: AtomicU64,

    /// Rows that exhausted their retry budget
    pub rows_failed_transient: AtomicU64,

    /// Rows still outstanding when their chunk timed out
    pub rows_abandoned: AtomicU64,

    /// Retries performed across all rows
    pub retries: AtomicU64,

    /// Chunks fully checkpointed
    pub chunks_completed: AtomicU64,

    /// Batch writes to the table store that failed
    pub batch_write_failures: AtomicU64,

    start_time: Instant,

    // Per-collaborator latency (microseconds, summed across workers)
    pub geocode_us: AtomicU64,
    pub locate_us: AtomicU64,
    pub publish_us: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            rows_succeeded: AtomicU64::new(0),
            rows_failed_permanent: AtomicU64::new(0),
            rows_failed_transient: AtomicU64::new(0),
            rows_abandoned: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            chunks_completed: AtomicU64::new(0),
            batch_write_failures: AtomicU64::new(0),
            start_time: Instant::now(),
            geocode_us: AtomicU64::new(0),
            locate_us: AtomicU64::new(0),
            publish_us: AtomicU64::new(0),
        }
    }
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_success(&self) {
        self.rows_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_permanent_failure(&self) {
        self.rows_failed_permanent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_transient_failure(&self) {
        self.rows_failed_transient.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_abandoned(&self, count: u64) {
        self.rows_abandoned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_chunk_completed(&self) {
        self.chunks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_batch_write_failure(&self) {
        self.batch_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_geocode_time(&self, duration: Duration) {
        self.geocode_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_locate_time(&self, duration: Duration) {
        self.locate_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_publish_time(&self, duration: Duration) {
        self.publish_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Rows that reached a terminal outcome.
    pub fn rows_finished(&self) -> u64 {
        self.rows_succeeded.load(Ordering::Relaxed)
            + self.rows_failed_permanent.load(Ordering::Relaxed)
            + self.rows_failed_transient.load(Ordering::Relaxed)
    }

    /// Get rows per minute.
    pub fn rows_per_minute(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.rows_finished() as f64 / elapsed * 60.0
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_succeeded: self.rows_succeeded.load(Ordering::Relaxed),
            rows_failed_permanent: self.rows_failed_permanent.load(Ordering::Relaxed),
            rows_failed_transient: self.rows_failed_transient.load(Ordering::Relaxed),
            rows_abandoned: self.rows_abandoned.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            batch_write_failures: self.batch_write_failures.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            rows_per_minute: self.rows_per_minute(),
            geocode_secs: self.geocode_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            locate_secs: self.locate_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            publish_secs: self.publish_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub rows_succeeded: u64,
    pub rows_failed_permanent: u64,
    pub rows_failed_transient: u64,
    pub rows_abandoned: u64,
    pub retries: u64,
    pub chunks_completed: u64,
    pub batch_write_failures: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub rows_per_minute: f64,
    /// Total time waiting on the geocoder (seconds, summed across workers)
    pub geocode_secs: f64,
    /// Total time waiting on the panorama locator
    pub locate_secs: f64,
    /// Total time waiting on the publisher
    pub publish_secs: f64,
}

impl MetricsSnapshot {
    pub fn rows_finished(&self) -> u64 {
        self.rows_succeeded + self.rows_failed_permanent + self.rows_failed_transient
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.geocode_secs + self.locate_secs + self.publish_secs;
        let (geocode_pct, locate_pct, publish_pct) = if total > 0.0 {
            (
                self.geocode_secs / total * 100.0,
                self.locate_secs / total * 100.0,
                self.publish_secs / total * 100.0,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        write!(
            f,
            "Rows: {} ok, {} permanent, {} transient, {} abandoned | Retries: {} | \
             Chunks: {} | Write failures: {} | Rate: {:.1} rows/min | Elapsed: {:.1}s | \
             Time: geocode {:.0}% | locate {:.0}% | publish {:.0}%",
            self.rows_succeeded,
            self.rows_failed_permanent,
            self.rows_failed_transient,
            self.rows_abandoned,
            self.retries,
            self.chunks_completed,
            self.batch_write_failures,
            self.rows_per_minute,
            self.elapsed.as_secs_f64(),
            geocode_pct,
            locate_pct,
            publish_pct,
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_rows: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_rows: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_rows,
        }
    }

    /// Log a snapshot every interval until `shutdown` fires.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if self.total_rows > 0 {
                        snapshot.rows_finished() as f64 / self.total_rows as f64 * 100.0
                    } else {
                        0.0
                    };

                    tracing::info!("[{:.1}%] {}", progress, snapshot);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Final: {}", self.metrics.snapshot());
                    break;
                }
            }
        }
    }
}
