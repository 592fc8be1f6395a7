//! Per-subsystem processing statistics.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::Serialize;

// Layer 3: Internal module imports
// (none)

/// Atomic processing counters for one subsystem.
#[derive(Debug, Default)]
pub struct SubsystemStats {
    messages_processed: AtomicU64,
    processing_errors: AtomicU64,
    retries_scheduled: AtomicU64,
    transactions_completed: AtomicU64,
    total_processing_micros: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Messages fully processed.
    pub messages_processed: u64,
    /// Handler failures observed.
    pub processing_errors: u64,
    /// Retry messages scheduled.
    pub retries_scheduled: u64,
    /// Transaction batches completed in order.
    pub transactions_completed: u64,
    /// Running average handler time in microseconds.
    pub avg_processing_micros: u64,
}

impl SubsystemStats {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed message and its processing time.
    pub fn record_processed(&self, elapsed: Duration) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record one handler failure.
    pub fn record_error(&self) {
        self.processing_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one scheduled retry.
    pub fn record_retry(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one transaction batch completed in order.
    pub fn record_transaction_completed(&self) {
        self.transactions_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages fully processed.
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Handler failures observed.
    pub fn processing_errors(&self) -> u64 {
        self.processing_errors.load(Ordering::Relaxed)
    }

    /// Retry messages scheduled.
    pub fn retries_scheduled(&self) -> u64 {
        self.retries_scheduled.load(Ordering::Relaxed)
    }

    /// Transaction batches completed.
    pub fn transactions_completed(&self) -> u64 {
        self.transactions_completed.load(Ordering::Relaxed)
    }

    /// Running average processing time.
    pub fn avg_processing_time(&self) -> Duration {
        let processed = self.messages_processed();
        if processed == 0 {
            return Duration::ZERO;
        }
        let total = self.total_processing_micros.load(Ordering::Relaxed);
        Duration::from_micros(total / processed)
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_processed: self.messages_processed(),
            processing_errors: self.processing_errors(),
            retries_scheduled: self.retries_scheduled(),
            transactions_completed: self.transactions_completed(),
            avg_processing_micros: self.avg_processing_time().as_micros() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = SubsystemStats::new();
        stats.record_processed(Duration::from_micros(100));
        stats.record_processed(Duration::from_micros(300));
        stats.record_error();
        stats.record_retry();
        stats.record_transaction_completed();

        assert_eq!(stats.messages_processed(), 2);
        assert_eq!(stats.processing_errors(), 1);
        assert_eq!(stats.retries_scheduled(), 1);
        assert_eq!(stats.transactions_completed(), 1);
    }

    #[test]
    fn test_running_average() {
        let stats = SubsystemStats::new();
        assert_eq!(stats.avg_processing_time(), Duration::ZERO);

        stats.record_processed(Duration::from_micros(100));
        stats.record_processed(Duration::from_micros(300));
        assert_eq!(stats.avg_processing_time(), Duration::from_micros(200));
    }

    #[test]
    fn test_snapshot() {
        let stats = SubsystemStats::new();
        stats.record_processed(Duration::from_micros(50));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_processed, 1);
        assert_eq!(snapshot.processing_errors, 0);
        assert_eq!(snapshot.avg_processing_micros, 50);
    }
}
