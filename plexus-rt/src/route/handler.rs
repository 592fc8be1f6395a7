//! Handler contract for route-tree entries.
//!
//! Handlers take ownership of the message copy they are given along with
//! any extracted path parameters and a context carrying the subsystem name
//! and its cancellation token. Cancellation is cooperative: long handlers
//! should check the token at natural yield points.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use crate::fault::FaultKind;
use crate::message::Message;

/// Parameters extracted from `{name}` placeholders during matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams(HashMap<String, String>);

impl RouteParams {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: String, value: String) {
        self.0.insert(name, value);
    }

    /// Look up one extracted parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Number of extracted parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no parameters were extracted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Processing finished; the optional value becomes the reply body when
    /// the message required a response.
    Complete(Option<Value>),

    /// Cooperative backoff: the message is considered processed, but the
    /// subsystem's current time slice ends early.
    Yield,
}

impl HandlerOutcome {
    /// Finished without a reply body.
    pub fn done() -> Self {
        Self::Complete(None)
    }

    /// Finished with a reply body.
    pub fn reply(body: Value) -> Self {
        Self::Complete(Some(body))
    }
}

/// Failure raised by a handler.
///
/// The kind feeds classification; `Internal` failures are retried until the
/// message's retry budget runs out, other kinds follow their table policy.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct HandlerError {
    /// Classification hint.
    pub kind: FaultKind,
    /// Human-readable description.
    pub detail: String,
}

impl HandlerError {
    /// Unclassified failure; retried while budget remains.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Internal,
            detail: detail.into(),
        }
    }

    /// Input validation failure; never retried.
    pub fn validation(detail: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Validation,
            detail: detail.into(),
        }
    }

    /// Failure attributed to an external collaborator.
    pub fn external(detail: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::External,
            detail: detail.into(),
        }
    }

    /// Plain application-level failure.
    pub fn simple(detail: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Simple,
            detail: detail.into(),
        }
    }
}

/// Per-invocation context handed to handlers.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    subsystem: String,
    cancel: CancellationToken,
}

impl HandlerContext {
    pub(crate) fn new(subsystem: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            subsystem: subsystem.into(),
            cancel,
        }
    }

    /// Name of the subsystem running this handler.
    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    /// True once the subsystem has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token handlers can await at yield points.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// A route-tree entry's callable.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Process one message.
    async fn handle(
        &self,
        message: Message,
        params: RouteParams,
        context: HandlerContext,
    ) -> Result<HandlerOutcome, HandlerError>;
}

struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> RouteHandler for FnHandler<F, Fut>
where
    F: Fn(Message, RouteParams, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerOutcome, HandlerError>> + Send,
{
    async fn handle(
        &self,
        message: Message,
        params: RouteParams,
        context: HandlerContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        (self.f)(message, params, context).await
    }
}

/// Wrap an async closure as a route handler.
///
/// # Example
/// ```rust
/// use plexus_rt::route::{route_fn, HandlerOutcome};
/// use serde_json::json;
///
/// let handler = route_fn(|msg, _params, _ctx| async move {
///     Ok(HandlerOutcome::reply(json!({ "ok": true, "echo": msg.body().clone() })))
/// });
/// ```
pub fn route_fn<F, Fut>(f: F) -> Arc<dyn RouteHandler>
where
    F: Fn(Message, RouteParams, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerOutcome, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _marker: PhantomData,
    })
}
