//! Lock-free mailbox metrics.
//!
//! Counter operations are atomic fetch-adds with relaxed ordering; the
//! last-message timestamp sits behind a parking_lot RwLock because it is
//! written rarely relative to the counters.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

// Layer 3: Internal module imports
// (none)

/// Atomic counters for one mailbox.
///
/// # Example
/// ```rust
/// use plexus_rt::mailbox::MailboxMetrics;
///
/// let metrics = MailboxMetrics::new();
/// metrics.record_enqueued();
/// metrics.record_dequeued();
///
/// assert_eq!(metrics.enqueued_count(), 1);
/// assert_eq!(metrics.dequeued_count(), 1);
/// assert_eq!(metrics.queue_full_events(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MailboxMetrics {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    rejected: AtomicU64,
    evicted: AtomicU64,
    expired: AtomicU64,
    last_message_at: RwLock<Option<DateTime<Utc>>>,
}

impl MailboxMetrics {
    /// Create a metrics block with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful admission.
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        *self.last_message_at.write() = Some(Utc::now());
    }

    /// Record a dequeue handed to the processor.
    pub fn record_dequeued(&self) {
        self.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejection under the `RejectNew` policy.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction under the `EvictOldest` policy.
    pub fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message dropped on dequeue because its TTL expired.
    pub fn record_expired(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }

    /// Total admissions.
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Total dequeues.
    pub fn dequeued_count(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    /// Total rejections under the `RejectNew` policy.
    pub fn queue_full_events(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Total evictions.
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Total TTL drops.
    pub fn expired_count(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    /// Timestamp of the most recent admission.
    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        *self.last_message_at.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = MailboxMetrics::new();
        assert_eq!(metrics.enqueued_count(), 0);
        assert_eq!(metrics.dequeued_count(), 0);
        assert_eq!(metrics.queue_full_events(), 0);
        assert_eq!(metrics.evicted_count(), 0);
        assert_eq!(metrics.expired_count(), 0);
        assert!(metrics.last_message_at().is_none());
    }

    #[test]
    fn test_enqueue_updates_timestamp() {
        let metrics = MailboxMetrics::new();
        metrics.record_enqueued();
        assert!(metrics.last_message_at().is_some());
    }

    #[test]
    fn test_counter_increments() {
        let metrics = MailboxMetrics::new();
        metrics.record_rejected();
        metrics.record_rejected();
        metrics.record_evicted();
        metrics.record_expired();

        assert_eq!(metrics.queue_full_events(), 2);
        assert_eq!(metrics.evicted_count(), 1);
        assert_eq!(metrics.expired_count(), 1);
    }
}
