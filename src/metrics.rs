use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Optional performance counters for the job system.
///
/// Updated with relaxed atomics on the scheduler's hot paths; read via
/// [`snapshot`](Metrics::snapshot).
#[derive(Debug)]
pub struct Metrics {
    /// Jobs published to the queue.
    pub jobs_scheduled: AtomicU64,
    /// Jobs whose payload and finish protocol have run.
    pub jobs_completed: AtomicU64,
    /// Successful pops from the job queue.
    pub queue_pops: AtomicU64,
    /// Full-queue retries while enqueueing (contention indicator).
    pub enqueue_retries: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

impl Metrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            jobs_scheduled: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            queue_pops: AtomicU64::new(0),
            enqueue_retries: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_scheduled: self.jobs_scheduled.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            queue_pops: self.queue_pops.load(Ordering::Relaxed),
            enqueue_retries: self.enqueue_retries.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_scheduled: u64,
    pub jobs_completed: u64,
    pub queue_pops: u64,
    pub enqueue_retries: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Approximates queue depth (scheduled - popped).
    pub fn queue_depth(&self) -> i64 {
        self.jobs_scheduled as i64 - self.queue_pops as i64
    }

    /// Serializes the snapshot to a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
