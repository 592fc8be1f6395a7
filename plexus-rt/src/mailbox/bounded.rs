//! Bounded FIFO mailbox.
//!
//! Unlike a channel, the mailbox supports `peek`, O(1) admission with an
//! explicit verdict, and oldest-first eviction, so it is a locked deque
//! rather than an mpsc pair. Exactly one processor drains each mailbox;
//! any number of senders may enqueue concurrently.

// Layer 1: Standard library imports
use std::collections::VecDeque;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use super::metrics::MailboxMetrics;
use crate::message::Message;

/// What to do with a new message when the mailbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DropPolicy {
    /// Reject the incoming message; the sender observes the failure.
    #[default]
    RejectNew,

    /// Evict the oldest queued message to admit the new one (LRU variant).
    EvictOldest,
}

/// Why an enqueue was not a plain admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Mailbox at capacity under the `RejectNew` policy.
    QueueFull,
}

/// Verdict of one enqueue attempt.
#[derive(Debug)]
pub enum Admission {
    /// Message admitted.
    Accepted,

    /// Message admitted after evicting the returned oldest message.
    ///
    /// The caller is responsible for reporting the eviction.
    Evicted(Message),

    /// Message not admitted.
    Rejected(RejectReason),
}

impl Admission {
    /// True when the new message entered the queue.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Fixed-capacity FIFO mailbox with admission metrics.
///
/// Invariant: `len() <= capacity()` at all times.
///
/// # Example
/// ```rust
/// use plexus_rt::mailbox::Mailbox;
/// use plexus_rt::message::MessageFactory;
/// use serde_json::json;
///
/// let factory = MessageFactory::new();
/// let mailbox = Mailbox::new(2);
///
/// let verdict = mailbox.enqueue(factory.create("svc://a", json!(1)).unwrap());
/// assert!(verdict.is_accepted());
/// assert_eq!(mailbox.len(), 1);
/// assert_eq!(mailbox.utilization(), 0.5);
/// ```
#[derive(Debug)]
pub struct Mailbox {
    capacity: usize,
    policy: DropPolicy,
    items: Mutex<VecDeque<Message>>,
    /// Admission and drain counters.
    pub metrics: MailboxMetrics,
}

impl Mailbox {
    /// Create a mailbox with the default `RejectNew` policy.
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, DropPolicy::RejectNew)
    }

    /// Create a mailbox with an explicit drop policy.
    pub fn with_policy(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            items: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            metrics: MailboxMetrics::new(),
        }
    }

    /// Attempt to admit a message. O(1).
    pub fn enqueue(&self, message: Message) -> Admission {
        let mut items = self.items.lock();
        if items.len() < self.capacity {
            items.push_back(message);
            drop(items);
            self.metrics.record_enqueued();
            return Admission::Accepted;
        }

        match self.policy {
            DropPolicy::RejectNew => {
                drop(items);
                self.metrics.record_rejected();
                Admission::Rejected(RejectReason::QueueFull)
            }
            DropPolicy::EvictOldest => {
                let evicted = items.pop_front();
                items.push_back(message);
                drop(items);
                self.metrics.record_enqueued();
                self.metrics.record_evicted();
                match evicted {
                    Some(old) => Admission::Evicted(old),
                    // capacity >= 1, so the queue was non-empty here
                    None => Admission::Accepted,
                }
            }
        }
    }

    /// Pop the oldest queued message, skipping expired ones.
    pub fn dequeue(&self) -> Option<Message> {
        loop {
            let candidate = self.items.lock().pop_front()?;
            if candidate.is_expired() {
                self.metrics.record_expired();
                continue;
            }
            self.metrics.record_dequeued();
            return Some(candidate);
        }
    }

    /// Clone of the oldest queued message without removing it.
    pub fn peek(&self) -> Option<Message> {
        self.items.lock().front().cloned()
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// True when no messages are queued.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured drop policy.
    pub fn policy(&self) -> DropPolicy {
        self.policy
    }

    /// Fill ratio in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Remove and return every queued message. Used by `dispose()` to
    /// forward undelivered messages to the dead-letter queue.
    pub fn drain_all(&self) -> Vec<Message> {
        self.items.lock().drain(..).collect()
    }
}
