//! Shared utility types.
//!
//! Identifier newtypes used across the kernel: message, transaction,
//! sender, and principal ids.

pub mod ids;

pub use ids::{MessageId, PrincipalId, SenderId, TransactionId};
