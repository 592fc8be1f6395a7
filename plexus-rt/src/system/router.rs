//! System-level message router.
//!
//! Extracts the target subsystem from a message path and hands the message
//! to that subsystem's mailbox (or processes it inline when the envelope
//! demands immediacy). The kernel subsystem sits in the registry like any
//! other; the router only tracks its traffic separately.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::registry::SubsystemRegistry;
use crate::fault::{DeadLetterQueue, DeadLetterReason, ErrorManager, FaultKind, RawFault};
use crate::message::Message;
use crate::subsystem::AcceptOutcome;

/// Routing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The path carries wildcards or placeholders and cannot address a
    /// mailbox.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No registered subsystem carries the name.
    #[error("unknown subsystem: {0}")]
    UnknownSubsystem(String),

    /// The target mailbox is full.
    #[error("mailbox full for subsystem: {0}")]
    QueueFull(String),

    /// The target subsystem is not built or already disposed.
    #[error("subsystem not accepting: {0}")]
    NotAccepting(String),
}

/// How the message was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Enqueued for a later scheduler tick.
    Queued,
    /// Processed inline due to `process_immediately`.
    Immediate,
    /// Processed inline by a synchronous subsystem.
    Inline,
}

/// Successful routing result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReceipt {
    /// The subsystem that took the message.
    pub subsystem: String,
    /// How delivery happened.
    pub mode: DeliveryMode,
}

/// Atomic routing counters.
#[derive(Debug, Default)]
pub struct RouterStats {
    messages_routed: AtomicU64,
    kernel_routes: AtomicU64,
    subsystem_routes: AtomicU64,
    unknown_routes: AtomicU64,
    invalid_paths: AtomicU64,
    enqueue_failures: AtomicU64,
}

/// Point-in-time copy of the router counters.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatsSnapshot {
    /// Successful deliveries.
    pub messages_routed: u64,
    /// Deliveries to the kernel subsystem.
    pub kernel_routes: u64,
    /// Deliveries to application subsystems.
    pub subsystem_routes: u64,
    /// Paths naming unregistered subsystems.
    pub unknown_routes: u64,
    /// Paths that could not address a mailbox.
    pub invalid_paths: u64,
    /// Deliveries refused by a full mailbox.
    pub enqueue_failures: u64,
}

impl RouterStats {
    fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            kernel_routes: self.kernel_routes.load(Ordering::Relaxed),
            subsystem_routes: self.subsystem_routes.load(Ordering::Relaxed),
            unknown_routes: self.unknown_routes.load(Ordering::Relaxed),
            invalid_paths: self.invalid_paths.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
        }
    }
}

/// Dispatches messages to subsystem mailboxes.
pub struct MessageRouter {
    registry: Arc<SubsystemRegistry>,
    kernel_name: String,
    errors: Arc<ErrorManager>,
    dead_letters: Arc<DeadLetterQueue>,
    stats: RouterStats,
}

impl MessageRouter {
    /// Create a router over a registry.
    pub fn new(
        registry: Arc<SubsystemRegistry>,
        kernel_name: impl Into<String>,
        errors: Arc<ErrorManager>,
        dead_letters: Arc<DeadLetterQueue>,
    ) -> Self {
        Self {
            registry,
            kernel_name: kernel_name.into(),
            errors,
            dead_letters,
            stats: RouterStats::default(),
        }
    }

    /// Routing counters.
    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Deliver one message.
    ///
    /// # Errors
    ///
    /// - [`RouterError::InvalidPath`]: recorded, nothing enqueued.
    /// - [`RouterError::UnknownSubsystem`]: recorded and dead-lettered.
    /// - [`RouterError::QueueFull`]: counted; the message is returned to
    ///   the caller's responsibility (no dead-letter).
    /// - [`RouterError::NotAccepting`]: the target is unbuilt or disposed.
    pub async fn route(&self, message: Message) -> Result<RouteReceipt, RouterError> {
        if !message.path().is_concrete() {
            self.stats.invalid_paths.fetch_add(1, Ordering::Relaxed);
            self.errors.record(
                RawFault::new(format!("unaddressable path {}", message.path()))
                    .with_kind(FaultKind::Validation)
                    .with_metadata("messageId", json!(message.id().to_string())),
            );
            return Err(RouterError::InvalidPath(message.path().to_string()));
        }

        let name = message.path().subsystem().to_string();
        let Some(subsystem) = self.registry.get(&name) else {
            self.stats.unknown_routes.fetch_add(1, Ordering::Relaxed);
            warn!(path = %message.path(), "no subsystem for message");
            self.errors.record(
                RawFault::new(format!("unknown subsystem {name}"))
                    .with_kind(FaultKind::Unroutable)
                    .with_metadata("messageId", json!(message.id().to_string()))
                    .with_metadata("path", json!(message.path().to_string())),
            );
            self.dead_letters
                .add(message, DeadLetterReason::UnknownSubsystem);
            return Err(RouterError::UnknownSubsystem(name));
        };

        if name == self.kernel_name {
            self.stats.kernel_routes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.subsystem_routes.fetch_add(1, Ordering::Relaxed);
        }

        let immediate = message.meta().process_immediately;
        let outcome = if immediate {
            subsystem.process_immediately(message).await
        } else {
            subsystem.accept(message).await
        };

        match outcome {
            AcceptOutcome::Queued => {
                self.stats.messages_routed.fetch_add(1, Ordering::Relaxed);
                debug!(subsystem = %name, "message queued");
                Ok(RouteReceipt {
                    subsystem: name,
                    mode: DeliveryMode::Queued,
                })
            }
            AcceptOutcome::ProcessedInline => {
                self.stats.messages_routed.fetch_add(1, Ordering::Relaxed);
                Ok(RouteReceipt {
                    subsystem: name,
                    mode: if immediate {
                        DeliveryMode::Immediate
                    } else {
                        DeliveryMode::Inline
                    },
                })
            }
            AcceptOutcome::Rejected => {
                if subsystem.is_built() && !subsystem.is_disposed() {
                    self.stats.enqueue_failures.fetch_add(1, Ordering::Relaxed);
                    Err(RouterError::QueueFull(name))
                } else {
                    Err(RouterError::NotAccepting(name))
                }
            }
        }
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("kernel", &self.kernel_name)
            .field("subsystems", &self.registry.len())
            .finish()
    }
}
