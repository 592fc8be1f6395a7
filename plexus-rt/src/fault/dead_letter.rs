//! Dead-letter queue for undeliverable messages.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

// Layer 3: Internal module imports
use crate::message::Message;

/// Why a message was quarantined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// No route matched inside the target subsystem.
    Unroutable,
    /// The path named a subsystem that is not registered.
    UnknownSubsystem,
    /// Retry budget exhausted.
    MaxRetries,
    /// The kernel access check denied delivery.
    AuthFailed,
    /// The owning subsystem was disposed with the message still queued.
    Shutdown,
    /// Evicted from a full mailbox under `EvictOldest`.
    QueueEvicted,
    /// A transaction prefix never completed.
    TransactionTimeout,
}

impl Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unroutable => "unroutable",
            Self::UnknownSubsystem => "unknown_subsystem",
            Self::MaxRetries => "maxretries",
            Self::AuthFailed => "auth_failed",
            Self::Shutdown => "shutdown",
            Self::QueueEvicted => "queue_evicted",
            Self::TransactionTimeout => "transaction_timeout",
        };
        write!(f, "{s}")
    }
}

/// One quarantined message.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The undeliverable message.
    pub message: Message,
    /// Why it landed here.
    pub reason: DeadLetterReason,
    /// When it landed here.
    pub at: DateTime<Utc>,
}

/// Bounded ring of quarantined messages.
///
/// # Example
/// ```rust
/// use plexus_rt::fault::{DeadLetterQueue, DeadLetterReason};
/// use plexus_rt::message::MessageFactory;
/// use serde_json::json;
///
/// let dlq = DeadLetterQueue::new(100);
/// let msg = MessageFactory::new().create("svc://nope", json!(null)).unwrap();
///
/// dlq.add(msg, DeadLetterReason::Unroutable);
/// assert_eq!(dlq.len(), 1);
/// assert_eq!(dlq.recent(1)[0].reason, DeadLetterReason::Unroutable);
/// ```
#[derive(Debug)]
pub struct DeadLetterQueue {
    ring: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl DeadLetterQueue {
    /// Create a queue holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    /// Quarantine a message. The oldest entry is displaced when full.
    pub fn add(&self, message: Message, reason: DeadLetterReason) {
        warn!(
            path = %message.path(),
            id = %message.id(),
            reason = %reason,
            "message dead-lettered"
        );
        let mut ring = self.ring.lock();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(DeadLetter {
            message,
            reason,
            at: Utc::now(),
        });
    }

    /// The most recent `n` entries, newest first (0 = all).
    pub fn recent(&self, n: usize) -> Vec<DeadLetter> {
        let ring = self.ring.lock();
        let take = if n == 0 { ring.len() } else { n };
        ring.iter().rev().take(take).cloned().collect()
    }

    /// Number of quarantined entries.
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    /// True when nothing is quarantined.
    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    /// Discard every entry.
    pub fn clear(&self) {
        self.ring.lock().clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests are allowed to use unwrap for simplicity
mod tests {
    use super::*;
    use crate::message::MessageFactory;
    use serde_json::json;

    fn msg(n: u64) -> Message {
        MessageFactory::new()
            .create("svc://op", json!({ "n": n }))
            .unwrap()
    }

    #[test]
    fn test_add_and_recent() {
        let dlq = DeadLetterQueue::new(10);
        dlq.add(msg(0), DeadLetterReason::Unroutable);
        dlq.add(msg(1), DeadLetterReason::MaxRetries);

        let recent = dlq.recent(0);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message.body()["n"], 1); // newest first
        assert_eq!(recent[0].reason, DeadLetterReason::MaxRetries);
    }

    #[test]
    fn test_bounded() {
        let dlq = DeadLetterQueue::new(2);
        for n in 0..4 {
            dlq.add(msg(n), DeadLetterReason::Shutdown);
        }
        assert_eq!(dlq.len(), 2);
        let recent = dlq.recent(0);
        assert_eq!(recent[0].message.body()["n"], 3);
        assert_eq!(recent[1].message.body()["n"], 2);
    }

    #[test]
    fn test_recent_limit() {
        let dlq = DeadLetterQueue::new(10);
        for n in 0..5 {
            dlq.add(msg(n), DeadLetterReason::Unroutable);
        }
        assert_eq!(dlq.recent(2).len(), 2);
    }

    #[test]
    fn test_clear() {
        let dlq = DeadLetterQueue::new(10);
        dlq.add(msg(0), DeadLetterReason::Unroutable);
        dlq.clear();
        assert!(dlq.is_empty());
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(DeadLetterReason::MaxRetries.to_string(), "maxretries");
        assert_eq!(DeadLetterReason::AuthFailed.to_string(), "auth_failed");
    }
}
