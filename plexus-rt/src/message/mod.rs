//! Message model: paths, envelopes, and the minting factory.

pub mod envelope;
pub mod factory;
pub mod path;

pub use envelope::{Message, MessageDraft, MessageKind, MessageMeta, MessagePriority};
pub use factory::{BatchSpec, MessageFactory};
pub use path::{MessagePath, PathError, Segment, RESERVED_SUBSYSTEMS};
