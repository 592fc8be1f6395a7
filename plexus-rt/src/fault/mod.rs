//! Error classification, bounded error storage, and the dead-letter queue.

pub mod dead_letter;
pub mod manager;
pub mod record;

pub use dead_letter::{DeadLetter, DeadLetterQueue, DeadLetterReason};
pub use manager::{ErrorClassifier, ErrorManager, ErrorQuery, ErrorSummary, RawFault};
pub use record::{ErrorRecord, FaultKind, Severity};
