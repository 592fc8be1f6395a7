//! Kernel service bundle shared with every registered subsystem.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use super::registry::SubsystemRegistry;
use super::router::MessageRouter;
use crate::access::{AccessTable, PrincipalRegistry};
use crate::channel::ChannelManager;
use crate::fault::{DeadLetterQueue, ErrorManager};
use crate::message::{Message, MessageFactory};
use crate::response::ResponseManager;

/// Handles to the kernel-hosted services.
///
/// Bound into each subsystem at registration; processors use it to record
/// errors, dead-letter messages, schedule retries, and deliver replies.
/// `dispose()` drops a subsystem's handle, which also breaks the
/// router → subsystem → services reference cycle at shutdown.
pub struct CoreServices {
    /// System-level message router.
    pub router: Arc<MessageRouter>,
    /// Pending-response correlation table.
    pub responses: Arc<ResponseManager>,
    /// Reply channel registry.
    pub channels: Arc<ChannelManager>,
    /// Error classification and storage.
    pub errors: Arc<ErrorManager>,
    /// Quarantine for undeliverable messages.
    pub dead_letters: Arc<DeadLetterQueue>,
    /// Envelope factory for kernel-originated messages.
    pub factory: MessageFactory,
    /// Principal arena.
    pub principals: Arc<PrincipalRegistry>,
    /// Reader/writer sets.
    pub access: Arc<AccessTable>,
    /// Subsystem lookup table.
    pub registry: Arc<SubsystemRegistry>,
}

impl CoreServices {
    /// Deliver a reply produced by a processor: resolve the pending entry
    /// and route it (fanning out through a channel when addressed to one).
    pub async fn deliver_reply(&self, reply: Message) {
        Box::pin(self.responses.deliver(reply)).await;
    }
}

impl std::fmt::Debug for CoreServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreServices").finish_non_exhaustive()
    }
}
