//! # plexus-rt - In-Process Message Kernel
//!
//! A framework for building applications as cooperating *subsystems* that
//! communicate exclusively by typed, path-addressed messages. A central
//! kernel routes every message, enforces identity-based access control on
//! delivery, multiplexes CPU across subsystems via a cooperative
//! time-sliced scheduler, and correlates replies to requests with
//! bounded-time guarantees.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use plexus_rt::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. Create and bootstrap a system
//!     let system = MessageSystem::new("app", KernelConfig::default())?;
//!     system.bootstrap()?;
//!
//!     // 2. Compose a subsystem: routes first, then freeze with build()
//!     let svc = Subsystem::builder("svc").with_capacity(64).finish()?;
//!     svc.register_route(
//!         "svc://echo",
//!         route_fn(|msg, _params, _ctx| async move {
//!             Ok(HandlerOutcome::reply(json!({ "ok": true, "body": msg.body().clone() })))
//!         }),
//!         RouteOptions::default(),
//!     )?;
//!     svc.build()?;
//!     system.register_subsystem(svc)?;
//!
//!     // 3. Send through the kernel's protected path
//!     let msg = system.factory().create("svc://echo", json!({ "x": 1 }))?;
//!     system.send(msg, &system.kernel_pkr()).await?;
//!
//!     system.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Core Concepts
//!
//! - **Message**: immutable envelope addressed by a `subsystem://...`
//!   path; only its `custom` metadata region may change in flight.
//! - **Subsystem**: named singleton owning a bounded mailbox, a route
//!   tree, a processor, statistics, and an identity record.
//! - **Kernel**: the root subsystem; its `send_protected` is the only
//!   send path for non-kernel callers and the only producer of
//!   `auth_failed`.
//! - **Scheduler**: a single loop granting time slices under a pluggable
//!   selection strategy (round-robin, weighted, priority, fair-share,
//!   queue-depth, adaptive).
//! - **Response manager**: pending-reply table keyed by correlation id
//!   with per-request timeouts.
//! - **Error manager / dead-letter queue**: classification into a bounded
//!   ring plus quarantine for undeliverable messages.
//!
//! # Delivery Guarantees
//!
//! FIFO from enqueue to handler within one mailbox; no ordering across
//! subsystems. Transaction batches sharing a transaction id are delivered
//! in `seq` order regardless of arrival order. Messages are delivered at
//! most once; retries are new messages with strictly increasing retry
//! counts. Nothing is persistent: undispatched messages are lost across
//! restarts.
//!
//! # Module Organization
//!
//! ## Core
//! - [`message`] - Paths, envelopes, and the minting factory
//! - [`mailbox`] - Bounded FIFO mailboxes with admission control
//! - [`route`] - Route trees and the handler contract
//! - [`subsystem`] - The subsystem composite and its processor
//!
//! ## Kernel
//! - [`access`] - Principals, public-key records, reader/writer sets
//! - [`kernel`] - The kernel subsystem and protected send path
//! - [`response`] - Request/response correlation with timeouts
//! - [`channel`] - Multi-participant reply channels
//! - [`fault`] - Error classification and the dead-letter queue
//!
//! ## Infrastructure
//! - [`sched`] - Global scheduler and selection strategies
//! - [`system`] - The top-level `MessageSystem` container
//! - [`util`] - Identifier newtypes

pub mod access;
pub mod channel;
pub mod fault;
pub mod kernel;
pub mod mailbox;
pub mod message;
pub mod prelude;
pub mod response;
pub mod route;
pub mod sched;
pub mod subsystem;
pub mod system;
pub mod util;

// Re-export commonly used types
pub use access::{AccessMode, AccessTable, PrincipalKind, PrincipalRegistry, PublicKeyRecord};
pub use channel::{Channel, ChannelManager};
pub use fault::{DeadLetterQueue, DeadLetterReason, ErrorManager, ErrorRecord, FaultKind, Severity};
pub use kernel::{KernelError, KernelSubsystem, SendOptions};
pub use mailbox::{DropPolicy, Mailbox, MailboxMetrics};
pub use message::{Message, MessageFactory, MessageKind, MessagePath, MessagePriority};
pub use response::{ReplyOptions, ResponseManager};
pub use route::{route_fn, HandlerError, HandlerOutcome, RouteHandler, RouteOptions, RouteTree};
pub use sched::{GlobalScheduler, SelectionStrategy, StrategyRegistry};
pub use subsystem::{listener_fn, ListenerStage, Subsystem, SubsystemError};
pub use system::{KernelConfig, MessageSystem, SystemError};
pub use util::{MessageId, PrincipalId, SenderId, TransactionId};
