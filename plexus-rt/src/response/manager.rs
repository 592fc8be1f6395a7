//! Pending-reply table keyed by correlation id, with per-request timers.
//!
//! A pending entry is inserted when a `response_required` message is sent,
//! removed on the first correlated reply or on deadline expiry. Expiry
//! synthesizes an error-kind reply with reason `timeout` and delivers it to
//! the registered reply path (fanning out when that path is a channel).

// Layer 1: Standard library imports
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::access::PublicKeyRecord;
use crate::channel::ChannelManager;
use crate::fault::{ErrorManager, FaultKind, RawFault};
use crate::message::{Message, MessageFactory, MessageKind, MessagePath};
use crate::system::router::MessageRouter;
use crate::util::{MessageId, PrincipalId};

/// Default reply deadline when the sender does not specify one.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for registering a pending response.
#[derive(Debug, Clone)]
pub struct ReplyOptions {
    /// Overrides the message's own `reply_to` when set.
    pub reply_to: Option<MessagePath>,
    /// Deadline for the correlated reply.
    pub timeout: Duration,
}

impl Default for ReplyOptions {
    fn default() -> Self {
        Self {
            reply_to: None,
            timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl ReplyOptions {
    /// Options with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// One tracked request awaiting its reply.
#[derive(Debug, Clone)]
pub struct PendingResponse {
    /// Correlation id (the request's message id unless overridden).
    pub correlation_id: MessageId,
    /// Principal that sent the request.
    pub owner: PrincipalId,
    /// Where the reply (or timeout notice) is delivered.
    pub reply_to: MessagePath,
    /// Absolute deadline.
    pub deadline: DateTime<Utc>,
    /// True once a correlated reply arrived.
    pub resolved: bool,
    /// True once the deadline fired.
    pub timed_out: bool,
}

struct PendingEntry {
    record: PendingResponse,
    timer: Option<AbortHandle>,
}

struct ResponseInner {
    by_correlation: DashMap<MessageId, PendingEntry>,
    by_owner: DashMap<PrincipalId, HashSet<MessageId>>,
    router: Arc<MessageRouter>,
    channels: Arc<ChannelManager>,
    factory: MessageFactory,
    errors: Arc<ErrorManager>,
    kernel: PublicKeyRecord,
}

/// Correlates replies to requests and enforces per-request deadlines.
///
/// Cheap to clone; clones share the pending table. Timer tasks hold a
/// clone so entries expire even if the original handle is dropped.
#[derive(Clone)]
pub struct ResponseManager {
    inner: Arc<ResponseInner>,
}

impl ResponseManager {
    /// Create a manager wired to the router and channel registry.
    pub fn new(
        router: Arc<MessageRouter>,
        channels: Arc<ChannelManager>,
        factory: MessageFactory,
        errors: Arc<ErrorManager>,
        kernel: PublicKeyRecord,
    ) -> Self {
        Self {
            inner: Arc::new(ResponseInner {
                by_correlation: DashMap::new(),
                by_owner: DashMap::new(),
                router,
                channels,
                factory,
                errors,
                kernel,
            }),
        }
    }

    /// Track a `response_required` message.
    ///
    /// Returns the correlation id, or `None` when the message does not
    /// require a response or no reply path is known. The timer task fires
    /// [`Self::expire`] at the deadline.
    pub fn register_response_required(
        &self,
        owner: &PublicKeyRecord,
        message: &Message,
        options: ReplyOptions,
    ) -> Option<MessageId> {
        if !message.meta().response_required {
            return None;
        }
        let reply_to = options
            .reply_to
            .or_else(|| message.meta().reply_to.clone())?;

        let correlation_id = message.correlation_id();
        let deadline = Utc::now()
            + chrono::Duration::from_std(options.timeout)
                .unwrap_or_else(|_| chrono::Duration::zero());

        let manager = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(options.timeout).await;
            manager.expire(correlation_id).await;
        })
        .abort_handle();

        self.inner
            .by_owner
            .entry(owner.id())
            .or_default()
            .insert(correlation_id);
        self.inner.by_correlation.insert(
            correlation_id,
            PendingEntry {
                record: PendingResponse {
                    correlation_id,
                    owner: owner.id(),
                    reply_to,
                    deadline,
                    resolved: false,
                    timed_out: false,
                },
                timer: Some(timer),
            },
        );
        debug!(%correlation_id, owner = %owner.id(), "pending response registered");
        Some(correlation_id)
    }

    fn remove_entry(&self, correlation_id: &MessageId) -> Option<PendingEntry> {
        let (_, mut entry) = self.inner.by_correlation.remove(correlation_id)?;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        if let Some(mut owned) = self.inner.by_owner.get_mut(&entry.record.owner) {
            owned.remove(correlation_id);
        }
        Some(entry)
    }

    /// Finalize a pending entry from an incoming correlated reply.
    ///
    /// Looks up `reply.meta.in_reply_to`; returns the finalized record, or
    /// `None` when nothing was pending under that correlation id.
    pub fn handle_response(&self, reply: &Message) -> Option<PendingResponse> {
        let correlation_id = reply.meta().in_reply_to?;
        let mut entry = self.remove_entry(&correlation_id)?;
        entry.record.resolved = true;
        debug!(%correlation_id, "pending response resolved");
        Some(entry.record)
    }

    /// Deliver a reply: resolve any pending entry, then route it, fanning
    /// out through a channel when the reply path names one.
    pub async fn deliver(&self, reply: Message) {
        self.handle_response(&reply);
        self.fan_out(reply).await;
    }

    async fn fan_out(&self, reply: Message) {
        match self.inner.channels.expand(&reply) {
            Ok(Some(copies)) => {
                for copy in copies {
                    let _ = self.inner.router.route(copy).await;
                }
            }
            Ok(None) => {
                let _ = self.inner.router.route(reply).await;
            }
            Err(denied) => {
                self.inner.errors.record(
                    RawFault::new(denied.to_string()).with_kind(FaultKind::AuthFailed),
                );
            }
        }
    }

    /// Expire one pending entry: synthesize the timeout reply and deliver
    /// it to the registered reply path. Returns false when nothing was
    /// pending (already resolved or cancelled).
    pub async fn expire(&self, correlation_id: MessageId) -> bool {
        let Some(mut entry) = self.remove_entry(&correlation_id) else {
            return false;
        };
        entry.record.timed_out = true;
        warn!(%correlation_id, "pending response timed out");

        self.inner.errors.record(
            RawFault::new(format!("response timeout for {correlation_id}"))
                .with_kind(FaultKind::Timeout)
                .with_metadata("correlationId", json!(correlation_id.to_string())),
        );

        let body = json!({
            "correlationId": correlation_id.to_string(),
            "reason": "timeout",
        });
        let mut draft = self
            .inner
            .factory
            .draft_for(entry.record.reply_to.clone(), body);
        draft.kind = MessageKind::Error;
        draft.meta.in_reply_to = Some(correlation_id);
        let notice = draft.build();
        notice.custom_set("callerId", json!(self.inner.kernel.id().to_string()));

        self.fan_out(notice).await;
        true
    }

    /// Drop a pending entry without synthesizing a reply.
    pub fn cancel(&self, correlation_id: MessageId) -> bool {
        self.remove_entry(&correlation_id).is_some()
    }

    /// Expire every pending entry owned by a principal. Used when a
    /// subsystem is disposed so its callers observe uniform timeouts.
    pub async fn expire_owned(&self, owner: &PrincipalId) {
        let ids: Vec<MessageId> = self
            .inner
            .by_owner
            .remove(owner)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default();
        for correlation_id in ids {
            self.expire(correlation_id).await;
        }
    }

    /// Total pending entries.
    pub fn pending_count(&self) -> usize {
        self.inner.by_correlation.len()
    }

    /// Pending entries owned by a principal.
    pub fn pending_for(&self, owner: &PrincipalId) -> usize {
        self.inner
            .by_owner
            .get(owner)
            .map(|set| set.len())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for ResponseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseManager")
            .field("pending", &self.pending_count())
            .finish()
    }
}
