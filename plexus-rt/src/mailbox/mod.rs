//! Bounded per-subsystem mailboxes with admission control.

pub mod bounded;
pub mod metrics;

pub use bounded::{Admission, DropPolicy, Mailbox, RejectReason};
pub use metrics::MailboxMetrics;
