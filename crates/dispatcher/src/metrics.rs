//! Sink metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single sink
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Batches written successfully
    write_count: AtomicU64,
    /// Records written successfully
    record_count: AtomicU64,
    /// Failed units of work
    failure_count: AtomicU64,
    /// Batches left in the queue when the sink stopped
    abandoned_count: AtomicU64,
}

impl SinkMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current queue length
    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    /// Set current queue length
    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    /// Get total write count
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Get total record count
    pub fn record_count(&self) -> u64 {
        self.record_count.load(Ordering::Relaxed)
    }

    /// Account one written batch of `records` records
    pub fn inc_write_count(&self, records: usize) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.record_count
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    /// Get failure count
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Increment failure count
    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get abandoned batch count
    pub fn abandoned_count(&self) -> u64 {
        self.abandoned_count.load(Ordering::Relaxed)
    }

    /// Add abandoned batches
    pub fn add_abandoned(&self, batches: usize) {
        self.abandoned_count
            .fetch_add(batches as u64, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            write_count: self.write_count(),
            record_count: self.record_count(),
            failure_count: self.failure_count(),
            abandoned_count: self.abandoned_count(),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub write_count: u64,
    pub record_count: u64,
    pub failure_count: u64,
    pub abandoned_count: u64,
}
