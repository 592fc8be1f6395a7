//! The subsystem composite.
//!
//! A subsystem owns exactly one mailbox, one route tree, one processor,
//! its statistics block, and an identity record bound at registration.
//! Shape (routes, listeners, query handlers) is frozen by `build()`;
//! message flow starts once the system registers the subsystem and binds
//! its services.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// Layer 3: Internal module imports
use super::builder::{CapabilityDescriptor, SubsystemBuilder};
use super::processor::TxnBuffer;
use super::stats::SubsystemStats;
use crate::fault::{DeadLetterReason, FaultKind, RawFault};
use crate::mailbox::{Admission, DropPolicy, Mailbox, MailboxMetrics};
use crate::message::{Message, MessagePath, PathError};
use crate::route::{RouteError, RouteHandler, RouteOptions, RouteTree};
use crate::access::PublicKeyRecord;
use crate::system::services::CoreServices;
use crate::util::TransactionId;

/// Subsystem lifecycle and composition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubsystemError {
    /// The name is reserved for kernel use.
    #[error("subsystem name is reserved: {0}")]
    ReservedName(String),

    /// The name was empty.
    #[error("subsystem name must not be empty")]
    EmptyName,

    /// `build()` was already called; shape is frozen.
    #[error("subsystem is already built")]
    AlreadyBuilt,

    /// The operation requires `build()` first.
    #[error("subsystem is not built")]
    NotBuilt,

    /// The subsystem was disposed.
    #[error("subsystem is disposed")]
    Disposed,

    /// A route pattern addressed a different subsystem.
    #[error("pattern {pattern} does not address subsystem {subsystem}")]
    RouteSubsystemMismatch {
        /// The offending pattern.
        pattern: String,
        /// This subsystem's name.
        subsystem: String,
    },

    /// Route registration failed.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Pattern parsing failed.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Two capability descriptors share a name.
    #[error("duplicate capability: {0}")]
    DuplicateCapability(String),

    /// A capability requires one that is not declared.
    #[error("capability {name} requires missing capability {requires}")]
    MissingCapability {
        /// The dependent capability.
        name: String,
        /// The absent prerequisite.
        requires: String,
    },

    /// The capability dependency graph contains a cycle.
    #[error("capability dependency cycle through {0}")]
    CapabilityCycle(String),
}

/// Where a listener observes the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStage {
    /// Before route matching and the handler.
    Before,
    /// After the handler (and any reply) completed.
    After,
}

/// Observer invoked around handler execution.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Observe one message. Listeners cannot veto processing.
    async fn observe(&self, message: Message);
}

struct FnListener<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> MessageListener for FnListener<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn observe(&self, message: Message) {
        (self.f)(message).await;
    }
}

/// Wrap an async closure as a listener.
pub fn listener_fn<F, Fut>(f: F) -> Arc<dyn MessageListener>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnListener {
        f,
        _marker: PhantomData,
    })
}

/// Verdict of one `accept()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Message queued for a later scheduler tick.
    Queued,
    /// Synchronous subsystem processed the message inline.
    ProcessedInline,
    /// Mailbox full (or subsystem not accepting); nothing was queued.
    Rejected,
}

/// Result of one scheduler time slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceReport {
    /// Messages processed during the slice.
    pub processed: usize,
    /// Wall-clock time consumed.
    pub elapsed: Duration,
    /// True when a handler requested cooperative backoff.
    pub yielded: bool,
}

pub(crate) struct SubsystemInner {
    pub(crate) name: String,
    pub(crate) mailbox: Mailbox,
    pub(crate) routes: RwLock<RouteTree>,
    pub(crate) query_handlers: RwLock<HashMap<String, Arc<dyn RouteHandler>>>,
    pub(crate) before_listeners: RwLock<Vec<Arc<dyn MessageListener>>>,
    pub(crate) after_listeners: RwLock<Vec<Arc<dyn MessageListener>>>,
    pub(crate) synchronous: bool,
    pub(crate) weight: f64,
    pub(crate) priority: u8,
    pub(crate) built: AtomicBool,
    pub(crate) disposed: AtomicBool,
    pub(crate) identity: RwLock<Option<PublicKeyRecord>>,
    pub(crate) services: RwLock<Option<Arc<CoreServices>>>,
    pub(crate) stats: SubsystemStats,
    pub(crate) cancel: CancellationToken,
    pub(crate) capabilities: Vec<CapabilityDescriptor>,
    pub(crate) txns: Mutex<HashMap<TransactionId, TxnBuffer>>,
    /// Serializes the processor: scheduler slices, synchronous accepts,
    /// and `process_immediately` never interleave.
    pub(crate) drain_lock: tokio::sync::Mutex<()>,
}

/// Named singleton unit of the message kernel.
///
/// Cheap to clone; clones share state.
///
/// # Example
/// ```rust
/// use plexus_rt::route::{route_fn, HandlerOutcome, RouteOptions};
/// use plexus_rt::subsystem::Subsystem;
/// use serde_json::json;
///
/// let subsystem = Subsystem::builder("svc").with_capacity(4).finish().unwrap();
/// subsystem
///     .register_route(
///         "svc://echo",
///         route_fn(|msg, _p, _c| async move {
///             Ok(HandlerOutcome::reply(json!({ "ok": true, "body": msg.body().clone() })))
///         }),
///         RouteOptions::default(),
///     )
///     .unwrap();
/// subsystem.build().unwrap();
/// ```
#[derive(Clone)]
pub struct Subsystem {
    pub(crate) inner: Arc<SubsystemInner>,
}

impl Subsystem {
    /// Start building a subsystem.
    pub fn builder(name: impl Into<String>) -> SubsystemBuilder {
        SubsystemBuilder::new(name)
    }

    pub(crate) fn construct(
        name: String,
        capacity: usize,
        drop_policy: DropPolicy,
        synchronous: bool,
        weight: f64,
        priority: u8,
        capabilities: Vec<CapabilityDescriptor>,
    ) -> Self {
        Self {
            inner: Arc::new(SubsystemInner {
                name,
                mailbox: Mailbox::with_policy(capacity, drop_policy),
                routes: RwLock::new(RouteTree::new()),
                query_handlers: RwLock::new(HashMap::new()),
                before_listeners: RwLock::new(Vec::new()),
                after_listeners: RwLock::new(Vec::new()),
                synchronous,
                weight,
                priority,
                built: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                identity: RwLock::new(None),
                services: RwLock::new(None),
                stats: SubsystemStats::new(),
                cancel: CancellationToken::new(),
                capabilities,
                txns: Mutex::new(HashMap::new()),
                drain_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Subsystem name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Scheduling weight.
    pub fn weight(&self) -> f64 {
        self.inner.weight
    }

    /// Scheduling priority.
    pub fn priority(&self) -> u8 {
        self.inner.priority
    }

    /// True when `accept()` processes inline instead of queueing.
    pub fn is_synchronous(&self) -> bool {
        self.inner.synchronous
    }

    /// True once `build()` succeeded.
    pub fn is_built(&self) -> bool {
        self.inner.built.load(Ordering::Acquire)
    }

    /// True once `dispose()` ran.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Declared capabilities in dependency order.
    pub fn capabilities(&self) -> &[CapabilityDescriptor] {
        &self.inner.capabilities
    }

    /// Look up a capability by name; absent names return `None`.
    pub fn capability(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.inner.capabilities.iter().find(|c| c.name == name)
    }

    /// True when the capability is declared.
    pub fn has_capability(&self, name: &str) -> bool {
        self.capability(name).is_some()
    }

    /// Identity bound at registration.
    pub fn identity(&self) -> Option<PublicKeyRecord> {
        self.inner.identity.read().clone()
    }

    /// Statistics block.
    pub fn stats(&self) -> &SubsystemStats {
        &self.inner.stats
    }

    /// Mailbox admission counters.
    pub fn mailbox_metrics(&self) -> &MailboxMetrics {
        &self.inner.mailbox.metrics
    }

    /// Current mailbox depth.
    pub fn queue_len(&self) -> usize {
        self.inner.mailbox.len()
    }

    /// Mailbox fill ratio.
    pub fn utilization(&self) -> f64 {
        self.inner.mailbox.utilization()
    }

    fn ensure_composing(&self) -> Result<(), SubsystemError> {
        if self.is_disposed() {
            return Err(SubsystemError::Disposed);
        }
        if self.is_built() {
            return Err(SubsystemError::AlreadyBuilt);
        }
        Ok(())
    }

    /// Register a route pattern. Composition-time only.
    ///
    /// # Errors
    ///
    /// Rejected after `build()`, for patterns addressing another
    /// subsystem, and for duplicate patterns without `overwrite`.
    pub fn register_route(
        &self,
        pattern: &str,
        handler: Arc<dyn RouteHandler>,
        options: RouteOptions,
    ) -> Result<(), SubsystemError> {
        self.ensure_composing()?;
        let pattern = MessagePath::parse(pattern)?;
        if pattern.subsystem() != self.inner.name {
            return Err(SubsystemError::RouteSubsystemMismatch {
                pattern: pattern.to_string(),
                subsystem: self.inner.name.clone(),
            });
        }
        self.inner.routes.write().register(&pattern, handler, options)?;
        Ok(())
    }

    /// Register a query handler keyed by the first path segment.
    /// Composition-time only.
    ///
    /// # Errors
    ///
    /// Rejected after `build()`.
    pub fn register_query_handler(
        &self,
        head: impl Into<String>,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<(), SubsystemError> {
        self.ensure_composing()?;
        self.inner.query_handlers.write().insert(head.into(), handler);
        Ok(())
    }

    /// Attach a listener. Composition-time only.
    ///
    /// # Errors
    ///
    /// Rejected after `build()`.
    pub fn add_listener(
        &self,
        stage: ListenerStage,
        listener: Arc<dyn MessageListener>,
    ) -> Result<(), SubsystemError> {
        self.ensure_composing()?;
        match stage {
            ListenerStage::Before => self.inner.before_listeners.write().push(listener),
            ListenerStage::After => self.inner.after_listeners.write().push(listener),
        }
        Ok(())
    }

    /// Freeze the subsystem's shape. One-shot.
    ///
    /// # Errors
    ///
    /// Returns [`SubsystemError::AlreadyBuilt`] on a second call.
    pub fn build(&self) -> Result<(), SubsystemError> {
        if self.is_disposed() {
            return Err(SubsystemError::Disposed);
        }
        self.inner
            .built
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SubsystemError::AlreadyBuilt)?;
        debug!(subsystem = %self.inner.name, "subsystem built");
        Ok(())
    }

    pub(crate) fn bind(&self, identity: PublicKeyRecord, services: Arc<CoreServices>) {
        *self.inner.identity.write() = Some(identity);
        *self.inner.services.write() = Some(services);
    }

    pub(crate) fn services(&self) -> Option<Arc<CoreServices>> {
        self.inner.services.read().clone()
    }

    /// Offer a message for delivery.
    ///
    /// Queued subsystems enqueue in O(1); synchronous subsystems process
    /// inline and never touch the mailbox. Returns `Rejected` when the
    /// mailbox is full under `RejectNew`, or when the subsystem is not
    /// built or already disposed.
    pub async fn accept(&self, message: Message) -> AcceptOutcome {
        if !self.is_built() || self.is_disposed() {
            return AcceptOutcome::Rejected;
        }

        if self.inner.synchronous {
            self.process_now(message).await;
            return AcceptOutcome::ProcessedInline;
        }

        match self.inner.mailbox.enqueue(message) {
            Admission::Accepted => AcceptOutcome::Queued,
            Admission::Evicted(evicted) => {
                self.report_eviction(evicted);
                AcceptOutcome::Queued
            }
            Admission::Rejected(_) => AcceptOutcome::Rejected,
        }
    }

    /// Process a message inline, bypassing the mailbox.
    pub async fn process_immediately(&self, message: Message) -> AcceptOutcome {
        if !self.is_built() || self.is_disposed() {
            return AcceptOutcome::Rejected;
        }
        self.process_now(message).await;
        AcceptOutcome::ProcessedInline
    }

    async fn process_now(&self, message: Message) {
        let _guard = self.inner.drain_lock.lock().await;
        self.process_message(message).await;
    }

    fn report_eviction(&self, evicted: Message) {
        if let Some(services) = self.services() {
            services.errors.record(
                RawFault::new(format!("mailbox evicted oldest message {}", evicted.id()))
                    .with_kind(FaultKind::QueueEvicted)
                    .with_subsystem(&self.inner.name),
            );
            services
                .dead_letters
                .add(evicted, DeadLetterReason::QueueEvicted);
        }
    }

    /// Drain the mailbox for up to `budget` of wall-clock time.
    ///
    /// The slice ends early when the mailbox empties or a handler yields;
    /// overrun is soft, the in-flight message always finishes.
    pub async fn allocate_time_slice(&self, budget: Duration) -> SliceReport {
        let _guard = self.inner.drain_lock.lock().await;
        let start = std::time::Instant::now();
        let mut processed = 0usize;
        let mut yielded = false;

        while start.elapsed() < budget {
            match self.process_tick().await {
                super::processor::TickOutcome::Idle => break,
                super::processor::TickOutcome::Buffered => continue,
                super::processor::TickOutcome::Processed(n) => processed += n,
                super::processor::TickOutcome::Yielded(n) => {
                    processed += n;
                    yielded = true;
                    break;
                }
            }
        }

        SliceReport {
            processed,
            elapsed: start.elapsed(),
            yielded,
        }
    }

    /// Cancel pending responses owned by this subsystem, drain the mailbox
    /// to the dead-letter queue with reason `shutdown`, and detach from the
    /// system. Idempotent.
    pub async fn dispose(&self) {
        if self
            .inner
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.inner.cancel.cancel();

        let services = self.inner.services.write().take();
        if let Some(services) = services {
            if let Some(identity) = self.identity() {
                services.responses.expire_owned(&identity.id()).await;
            }
            for message in self.inner.mailbox.drain_all() {
                services.dead_letters.add(message, DeadLetterReason::Shutdown);
            }
        } else {
            self.inner.mailbox.drain_all();
        }
        debug!(subsystem = %self.inner.name, "subsystem disposed");
    }
}

impl std::fmt::Debug for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subsystem")
            .field("name", &self.inner.name)
            .field("built", &self.is_built())
            .field("disposed", &self.is_disposed())
            .field("queue_len", &self.queue_len())
            .field("synchronous", &self.inner.synchronous)
            .finish()
    }
}
