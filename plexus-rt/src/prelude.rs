//! Convenience re-exports for application code.
//!
//! ```rust
//! use plexus_rt::prelude::*;
//! ```

pub use crate::access::{AccessMode, PrincipalKind, PublicKeyRecord};
pub use crate::fault::{DeadLetterReason, FaultKind, Severity};
pub use crate::kernel::SendOptions;
pub use crate::mailbox::DropPolicy;
pub use crate::message::{Message, MessageFactory, MessageKind, MessagePath, MessagePriority};
pub use crate::route::{
    route_fn, HandlerContext, HandlerError, HandlerOutcome, RouteOptions, RouteParams,
};
pub use crate::subsystem::{listener_fn, ListenerStage, Subsystem};
pub use crate::system::{KernelConfig, MessageSystem, SystemError};
pub use crate::util::{MessageId, PrincipalId, TransactionId};
