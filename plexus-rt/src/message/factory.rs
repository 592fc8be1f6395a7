//! Envelope minting.
//!
//! The factory is the only constructor of [`Message`] values. It mints a
//! stable sender id at construction and stamps it into every envelope,
//! assigns fresh message ids, and hands out shared transaction ids for
//! ordered batches.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use serde_json::Value;

// Layer 3: Internal module imports
use super::envelope::{Message, MessageDraft, MessageKind};
use super::path::{MessagePath, PathError};
use crate::util::{SenderId, TransactionId};

/// One entry of a transaction batch: target path plus body.
#[derive(Debug, Clone)]
pub struct BatchSpec {
    /// Target path for this batch member.
    pub path: MessagePath,
    /// Payload for this batch member.
    pub body: Value,
}

impl BatchSpec {
    /// Convenience constructor parsing the path.
    ///
    /// # Errors
    ///
    /// Returns a [`PathError`] when the path does not parse.
    pub fn parse(path: &str, body: Value) -> Result<Self, PathError> {
        Ok(Self {
            path: MessagePath::parse(path)?,
            body,
        })
    }
}

/// Mints messages with fresh ids and a stable per-factory sender id.
///
/// Cheap to clone; clones share the sender id.
///
/// # Example
/// ```rust
/// use plexus_rt::message::{MessageFactory, MessageKind};
/// use serde_json::json;
///
/// let factory = MessageFactory::new();
///
/// let msg = factory.create("svc://echo", json!({"x": 1})).unwrap();
/// assert_eq!(msg.kind(), MessageKind::Simple);
///
/// let query = factory
///     .draft("svc://lookup", json!({"key": "k"}))
///     .unwrap()
///     .with_kind(MessageKind::Query)
///     .build();
/// assert_eq!(query.meta().sender_id, msg.meta().sender_id);
/// ```
#[derive(Debug, Clone)]
pub struct MessageFactory {
    sender_id: SenderId,
}

impl MessageFactory {
    /// Create a factory with a fresh sender id.
    pub fn new() -> Self {
        Self {
            sender_id: SenderId::new(),
        }
    }

    /// The sender id stamped into every envelope this factory mints.
    pub fn sender_id(&self) -> SenderId {
        self.sender_id
    }

    /// Create a simple message with default options.
    ///
    /// # Errors
    ///
    /// Returns a [`PathError`] when the path has no valid subsystem
    /// segment.
    pub fn create(&self, path: &str, body: Value) -> Result<Message, PathError> {
        Ok(self.draft(path, body)?.build())
    }

    /// Start a draft for a message with non-default options.
    ///
    /// # Errors
    ///
    /// Returns a [`PathError`] when the path does not parse.
    pub fn draft(&self, path: &str, body: Value) -> Result<MessageDraft, PathError> {
        let path = MessagePath::parse(path)?;
        Ok(MessageDraft::new(path, body, self.sender_id))
    }

    /// Start a draft from an already-parsed path.
    pub fn draft_for(&self, path: MessagePath, body: Value) -> MessageDraft {
        MessageDraft::new(path, body, self.sender_id)
    }

    /// Create an ordered transaction batch.
    ///
    /// All members share one freshly minted transaction id and carry
    /// monotonically increasing `seq` starting at 0. The final member is
    /// flagged so the processor can count the transaction as completed.
    pub fn transaction_batch(&self, specs: Vec<BatchSpec>) -> Vec<Message> {
        let transaction_id = TransactionId::new();
        let last = specs.len().saturating_sub(1);
        specs
            .into_iter()
            .enumerate()
            .map(|(seq, spec)| {
                let mut draft = MessageDraft::new(spec.path, spec.body, self.sender_id)
                    .with_kind(MessageKind::Transaction);
                draft.meta.transaction_id = Some(transaction_id);
                draft.meta.seq = Some(seq as u32);
                if seq == last {
                    draft = draft.with_custom("txnFinal", Value::Bool(true));
                }
                draft.build()
            })
            .collect()
    }
}

impl Default for MessageFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests are allowed to use unwrap for simplicity
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_validates_path() {
        let factory = MessageFactory::new();
        assert!(factory.create("not-a-path", json!(null)).is_err());
        assert!(factory.create("svc://echo", json!(null)).is_ok());
    }

    #[test]
    fn test_ids_are_unique_sender_is_stable() {
        let factory = MessageFactory::new();
        let a = factory.create("svc://a", json!(1)).unwrap();
        let b = factory.create("svc://b", json!(2)).unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.meta().sender_id, b.meta().sender_id);
        assert_eq!(a.meta().sender_id, factory.sender_id());
    }

    #[test]
    fn test_clone_shares_sender_id() {
        let factory = MessageFactory::new();
        let clone = factory.clone();
        assert_eq!(factory.sender_id(), clone.sender_id());
    }

    #[test]
    fn test_transaction_batch_ordering() {
        let factory = MessageFactory::new();
        let batch = factory.transaction_batch(vec![
            BatchSpec::parse("svc://step", json!({"n": 0})).unwrap(),
            BatchSpec::parse("svc://step", json!({"n": 1})).unwrap(),
            BatchSpec::parse("svc://step", json!({"n": 2})).unwrap(),
        ]);

        assert_eq!(batch.len(), 3);
        let txn = batch[0].meta().transaction_id.unwrap();
        for (i, msg) in batch.iter().enumerate() {
            assert_eq!(msg.kind(), MessageKind::Transaction);
            assert_eq!(msg.meta().transaction_id, Some(txn));
            assert_eq!(msg.meta().seq, Some(i as u32));
        }
        assert!(!batch[0].custom_flag("txnFinal"));
        assert!(!batch[1].custom_flag("txnFinal"));
        assert!(batch[2].custom_flag("txnFinal"));
    }

    #[test]
    fn test_transaction_batch_single_member() {
        let factory = MessageFactory::new();
        let batch =
            factory.transaction_batch(vec![BatchSpec::parse("svc://only", json!(null)).unwrap()]);

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].meta().seq, Some(0));
        assert!(batch[0].custom_flag("txnFinal"));
    }

    #[test]
    fn test_empty_transaction_batch() {
        let factory = MessageFactory::new();
        assert!(factory.transaction_batch(vec![]).is_empty());
    }
}
