//! Immutable message envelope.
//!
//! A [`Message`] is created once by a [`crate::message::MessageFactory`],
//! delivered at most once to each addressed subsystem, and processed once.
//! `id`, `path`, and `meta` never change after creation; the only mutable
//! region is the `custom` metadata map, which handlers may touch in-flight.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use super::path::MessagePath;
use crate::util::{MessageId, SenderId, TransactionId};

/// Default number of retries a failed message is granted.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Message kinds recognized by the processor pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain one-way message.
    #[default]
    Simple,
    /// Must be processed as a unit; never retried partially.
    Atomic,
    /// Member of a non-transactional batch.
    Batch,
    /// Delegated to the subsystem's query-handler map when one matches.
    Query,
    /// Imperative request.
    Command,
    /// Member of an ordered transaction batch.
    Transaction,
    /// Re-delivery of a failed message with an incremented retry count.
    Retry,
    /// Synthesized failure notification.
    Error,
    /// Reply correlated to an earlier request.
    Response,
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Simple => "simple",
            Self::Atomic => "atomic",
            Self::Batch => "batch",
            Self::Query => "query",
            Self::Command => "command",
            Self::Transaction => "transaction",
            Self::Retry => "retry",
            Self::Error => "error",
            Self::Response => "response",
        };
        write!(f, "{s}")
    }
}

/// Message priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    /// Background traffic.
    Low,
    /// Default.
    #[default]
    Normal,
    /// Important messages.
    High,
    /// System-critical messages.
    Critical,
}

/// Frozen creation-time metadata.
///
/// Everything here is fixed when the factory mints the envelope. Free-form
/// in-flight state lives in the message's `custom` map instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Identity of the minting factory.
    pub sender_id: SenderId,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Transaction this message belongs to, if any.
    pub transaction_id: Option<TransactionId>,

    /// Position inside the transaction batch (0-based, monotonic).
    pub seq: Option<u32>,

    /// Retry budget for failed processing.
    pub max_retries: u32,

    /// How many retries preceded this delivery. Strictly increases across
    /// retry messages derived from one original.
    pub retry_count: u32,

    /// Explicit correlation id, when different from the message id.
    pub correlation_id: Option<MessageId>,

    /// Id of the request this message replies to.
    pub in_reply_to: Option<MessageId>,

    /// Where replies should be delivered.
    pub reply_to: Option<MessagePath>,

    /// Whether the sender expects a correlated reply.
    pub response_required: bool,

    /// Bypass the mailbox and process inline on delivery.
    pub process_immediately: bool,

    /// Priority hint.
    pub priority: MessagePriority,

    /// Time-to-live in seconds; expired messages are dropped on dequeue.
    pub ttl: Option<u64>,
}

impl MessageMeta {
    fn new(sender_id: SenderId) -> Self {
        Self {
            sender_id,
            created_at: Utc::now(),
            transaction_id: None,
            seq: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_count: 0,
            correlation_id: None,
            in_reply_to: None,
            reply_to: None,
            response_required: false,
            process_immediately: false,
            priority: MessagePriority::Normal,
            ttl: None,
        }
    }
}

/// Immutable, path-addressed message envelope.
///
/// The framework treats the body as shallow-immutable: handlers that need
/// mutable derived state must clone. The `custom` map is the single
/// exception to envelope immutability and is safe to mutate from handlers.
///
/// # Example
/// ```rust
/// use plexus_rt::message::MessageFactory;
/// use serde_json::json;
///
/// let factory = MessageFactory::new();
/// let msg = factory.create("svc://echo", json!({"x": 1})).unwrap();
///
/// assert_eq!(msg.path().to_string(), "svc://echo");
/// assert_eq!(msg.body()["x"], 1);
/// ```
#[derive(Debug)]
pub struct Message {
    id: MessageId,
    path: MessagePath,
    kind: MessageKind,
    body: Value,
    meta: MessageMeta,
    custom: RwLock<HashMap<String, Value>>,
}

impl Clone for Message {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            path: self.path.clone(),
            kind: self.kind,
            body: self.body.clone(),
            meta: self.meta.clone(),
            custom: RwLock::new(self.custom.read().clone()),
        }
    }
}

impl Message {
    pub(crate) fn from_parts(
        id: MessageId,
        path: MessagePath,
        kind: MessageKind,
        body: Value,
        meta: MessageMeta,
        custom: HashMap<String, Value>,
    ) -> Self {
        Self {
            id,
            path,
            kind,
            body,
            meta,
            custom: RwLock::new(custom),
        }
    }

    /// Globally unique message id; doubles as the correlation id.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Target path.
    pub fn path(&self) -> &MessagePath {
        &self.path
    }

    /// Message kind.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Opaque payload.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Frozen creation-time metadata.
    pub fn meta(&self) -> &MessageMeta {
        &self.meta
    }

    /// Correlation id: explicit override or the message id itself.
    pub fn correlation_id(&self) -> MessageId {
        self.meta.correlation_id.unwrap_or(self.id)
    }

    /// Read one custom metadata entry.
    pub fn custom_get(&self, key: &str) -> Option<Value> {
        self.custom.read().get(key).cloned()
    }

    /// Write one custom metadata entry, returning any prior value.
    ///
    /// This is the only part of a message a handler may mutate in-flight.
    pub fn custom_set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.custom.write().insert(key.into(), value)
    }

    /// True when a custom entry exists and is not `false`/`null`.
    pub fn custom_flag(&self, key: &str) -> bool {
        match self.custom.read().get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }

    /// Snapshot of the custom metadata map.
    pub fn custom_snapshot(&self) -> HashMap<String, Value> {
        self.custom.read().clone()
    }

    /// Check TTL expiration against the creation timestamp.
    pub fn is_expired(&self) -> bool {
        if let Some(ttl) = self.meta.ttl {
            let age = Utc::now()
                .signed_duration_since(self.meta.created_at)
                .num_seconds()
                .max(0) as u64;
            age > ttl
        } else {
            false
        }
    }

    /// JSON description for diagnostics and kernel service replies.
    pub fn describe(&self) -> Value {
        serde_json::json!({
            "id": self.id.to_string(),
            "path": self.path.to_string(),
            "kind": self.kind.to_string(),
            "body": self.body,
            "retryCount": self.meta.retry_count,
            "createdAt": self.meta.created_at.to_rfc3339(),
        })
    }
}

/// Builder for messages with non-default options.
///
/// Obtained from [`crate::message::MessageFactory::draft`]; `build()` is
/// infallible because the path was validated when the draft was created.
#[derive(Debug)]
pub struct MessageDraft {
    pub(crate) id: MessageId,
    pub(crate) path: MessagePath,
    pub(crate) kind: MessageKind,
    pub(crate) body: Value,
    pub(crate) meta: MessageMeta,
    pub(crate) custom: HashMap<String, Value>,
}

impl MessageDraft {
    pub(crate) fn new(path: MessagePath, body: Value, sender_id: SenderId) -> Self {
        Self {
            id: MessageId::new(),
            path,
            kind: MessageKind::Simple,
            body,
            meta: MessageMeta::new(sender_id),
            custom: HashMap::new(),
        }
    }

    /// Set the message kind.
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the reply path and mark the message as requiring a response.
    pub fn with_reply_to(mut self, reply_to: MessagePath) -> Self {
        self.meta.reply_to = Some(reply_to);
        self
    }

    /// Require a correlated response.
    pub fn with_response_required(mut self) -> Self {
        self.meta.response_required = true;
        self
    }

    /// Bypass the mailbox and process inline on delivery.
    pub fn with_process_immediately(mut self) -> Self {
        self.meta.process_immediately = true;
        self
    }

    /// Set the priority hint.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.meta.priority = priority;
        self
    }

    /// Set time-to-live in seconds.
    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.meta.ttl = Some(ttl_seconds);
        self
    }

    /// Override the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.meta.max_retries = max_retries;
        self
    }

    /// Mark this draft as a reply to an earlier message.
    pub fn with_in_reply_to(mut self, request_id: MessageId) -> Self {
        self.meta.in_reply_to = Some(request_id);
        self
    }

    /// Seed a custom metadata entry.
    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }

    /// Finalize the envelope. The metadata map is frozen from here on.
    pub fn build(self) -> Message {
        Message::from_parts(self.id, self.path, self.kind, self.body, self.meta, self.custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests are allowed to use unwrap for simplicity
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(path: &str) -> MessageDraft {
        MessageDraft::new(
            MessagePath::parse(path).unwrap(),
            json!({"x": 1}),
            SenderId::new(),
        )
    }

    #[test]
    fn test_defaults() {
        let msg = draft("svc://echo").build();

        assert_eq!(msg.kind(), MessageKind::Simple);
        assert_eq!(msg.meta().priority, MessagePriority::Normal);
        assert_eq!(msg.meta().max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(msg.meta().retry_count, 0);
        assert!(!msg.meta().response_required);
        assert!(!msg.meta().process_immediately);
        assert!(msg.meta().reply_to.is_none());
    }

    #[test]
    fn test_builder_chaining() {
        let reply_to = MessagePath::parse("caller://reply").unwrap();
        let msg = draft("svc://op")
            .with_kind(MessageKind::Command)
            .with_reply_to(reply_to.clone())
            .with_response_required()
            .with_priority(MessagePriority::High)
            .with_ttl(60)
            .build();

        assert_eq!(msg.kind(), MessageKind::Command);
        assert_eq!(msg.meta().reply_to, Some(reply_to));
        assert!(msg.meta().response_required);
        assert_eq!(msg.meta().priority, MessagePriority::High);
        assert_eq!(msg.meta().ttl, Some(60));
    }

    #[test]
    fn test_correlation_defaults_to_id() {
        let msg = draft("svc://echo").build();
        assert_eq!(msg.correlation_id(), msg.id());
    }

    #[test]
    fn test_custom_map_mutation() {
        let msg = draft("svc://echo").build();

        assert!(msg.custom_get("callerId").is_none());
        msg.custom_set("callerId", json!("abc"));
        assert_eq!(msg.custom_get("callerId"), Some(json!("abc")));

        // Overwrite returns the prior value
        let prior = msg.custom_set("callerId", json!("def"));
        assert_eq!(prior, Some(json!("abc")));
    }

    #[test]
    fn test_custom_flag() {
        let msg = draft("svc://echo").build();
        assert!(!msg.custom_flag("noRetry"));

        msg.custom_set("noRetry", json!(true));
        assert!(msg.custom_flag("noRetry"));

        msg.custom_set("noRetry", json!(false));
        assert!(!msg.custom_flag("noRetry"));
    }

    #[test]
    fn test_clone_detaches_custom_map() {
        let msg = draft("svc://echo").build();
        msg.custom_set("k", json!(1));

        let copy = msg.clone();
        copy.custom_set("k", json!(2));

        assert_eq!(msg.custom_get("k"), Some(json!(1)));
        assert_eq!(copy.custom_get("k"), Some(json!(2)));
    }

    #[test]
    fn test_ttl_not_expired_when_fresh() {
        let msg = draft("svc://echo").with_ttl(60).build();
        assert!(!msg.is_expired());
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let msg = draft("svc://echo").build();
        assert!(!msg.is_expired());
    }

    #[test]
    fn test_describe_shape() {
        let msg = draft("svc://echo").build();
        let desc = msg.describe();

        assert_eq!(desc["path"], "svc://echo");
        assert_eq!(desc["kind"], "simple");
        assert_eq!(desc["body"]["x"], 1);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(MessageKind::Transaction.to_string(), "transaction");
        assert_eq!(MessageKind::Response.to_string(), "response");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(MessagePriority::Critical > MessagePriority::High);
        assert!(MessagePriority::High > MessagePriority::Normal);
        assert!(MessagePriority::Normal > MessagePriority::Low);
    }
}
