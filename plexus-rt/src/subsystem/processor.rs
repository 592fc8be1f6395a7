//! The per-subsystem message processor.
//!
//! One tick drains one mailbox entry and runs it through the pipeline:
//! before-listeners, query delegation, route matching, handler invocation,
//! failure classification with retry/dead-letter policy, reply delivery,
//! statistics, after-listeners. Transaction members are released strictly
//! in `seq` order; out-of-order arrivals wait in a per-transaction buffer.

// Layer 1: Standard library imports
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::base::Subsystem;
use crate::fault::{DeadLetterReason, FaultKind, RawFault};
use crate::message::{Message, MessageKind};
use crate::route::{HandlerContext, HandlerError, HandlerOutcome, RouteHandler, RouteParams};

/// How long an incomplete transaction prefix may wait for its gap.
const TXN_BUFFER_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry backoff: exponential from 10ms, jitter +/-20%, capped at 5s.
fn retry_backoff(retry_count: u32) -> Duration {
    const BASE_MS: u64 = 10;
    const CAP_MS: u64 = 5_000;
    let exp = BASE_MS.saturating_mul(1u64 << retry_count.min(16)) / 2;
    let capped = exp.clamp(BASE_MS, CAP_MS);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

/// Outcome of one processor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// Mailbox empty.
    Idle,
    /// A transaction member was buffered or dropped; no handler ran.
    Buffered,
    /// Processed `n` messages (a released transaction run may exceed 1).
    Processed(usize),
    /// Processed `n` messages and a handler requested backoff.
    Yielded(usize),
}

/// Per-transaction reordering state.
pub(crate) struct TxnBuffer {
    next_seq: u32,
    pending: BTreeMap<u32, Message>,
    last_arrival: Instant,
}

impl TxnBuffer {
    fn new() -> Self {
        Self {
            next_seq: 0,
            pending: BTreeMap::new(),
            last_arrival: Instant::now(),
        }
    }
}

impl Subsystem {
    /// Drain and process one mailbox entry.
    pub(crate) async fn process_tick(&self) -> TickOutcome {
        self.expire_stale_transactions();

        let Some(message) = self.inner.mailbox.dequeue() else {
            return TickOutcome::Idle;
        };

        let txn_key = match (message.kind(), message.meta().transaction_id, message.meta().seq) {
            (MessageKind::Transaction, Some(txn), Some(seq)) => Some((txn, seq)),
            _ => None,
        };

        let Some((txn, seq)) = txn_key else {
            let yielded = self.process_message(message).await;
            return if yielded {
                TickOutcome::Yielded(1)
            } else {
                TickOutcome::Processed(1)
            };
        };

        // Release transaction members strictly in seq order.
        let run: Vec<Message> = {
            let mut txns = self.inner.txns.lock();
            let buffer = txns.entry(txn).or_insert_with(TxnBuffer::new);
            buffer.last_arrival = Instant::now();

            if seq < buffer.next_seq {
                debug!(subsystem = %self.name(), %txn, seq, "duplicate transaction member dropped");
                return TickOutcome::Buffered;
            }
            if seq > buffer.next_seq {
                buffer.pending.insert(seq, message);
                return TickOutcome::Buffered;
            }

            let mut run = vec![message];
            buffer.next_seq += 1;
            while let Some(next) = buffer.pending.remove(&buffer.next_seq) {
                run.push(next);
                buffer.next_seq += 1;
            }
            run
        };

        let mut processed = 0usize;
        let mut yielded = false;
        for member in run {
            let finishes_txn = member.custom_flag("txnFinal");
            yielded |= self.process_message(member).await;
            processed += 1;
            if finishes_txn {
                self.inner.stats.record_transaction_completed();
                self.inner.txns.lock().remove(&txn);
            }
        }

        if yielded {
            TickOutcome::Yielded(processed)
        } else {
            TickOutcome::Processed(processed)
        }
    }

    /// Run one message through the full pipeline. Returns true when the
    /// handler requested cooperative backoff.
    pub(crate) async fn process_message(&self, message: Message) -> bool {
        let start = Instant::now();

        let before: Vec<_> = self.inner.before_listeners.read().clone();
        for listener in &before {
            listener.observe(message.clone()).await;
        }

        let resolved = self.resolve_handler(&message);
        let Some((handler, params)) = resolved else {
            self.report_unroutable(&message).await;
            let after: Vec<_> = self.inner.after_listeners.read().clone();
            for listener in &after {
                listener.observe(message.clone()).await;
            }
            return false;
        };

        let context = HandlerContext::new(self.name(), self.inner.cancel.clone());
        let result = handler.handle(message.clone(), params, context).await;

        let mut yielded = false;
        match result {
            Ok(HandlerOutcome::Complete(body)) => {
                self.inner.stats.record_processed(start.elapsed());
                if let Some(body) = body {
                    if message.meta().response_required {
                        self.send_reply(&message, body).await;
                    }
                }
            }
            Ok(HandlerOutcome::Yield) => {
                self.inner.stats.record_processed(start.elapsed());
                yielded = true;
            }
            Err(error) => {
                self.inner.stats.record_error();
                self.handle_failure(message.clone(), error).await;
            }
        }

        let after: Vec<_> = self.inner.after_listeners.read().clone();
        for listener in &after {
            listener.observe(message.clone()).await;
        }

        yielded
    }

    /// Query messages prefer the query-handler map; everything else (and
    /// queries without a registered head) goes through the route tree.
    /// Only the most specific route match is invoked.
    fn resolve_handler(&self, message: &Message) -> Option<(Arc<dyn RouteHandler>, RouteParams)> {
        if message.kind() == MessageKind::Query {
            if let Some(head) = message.path().head() {
                if let Some(handler) = self.inner.query_handlers.read().get(head) {
                    return Some((Arc::clone(handler), RouteParams::new()));
                }
            }
        }
        let routes = self.inner.routes.read();
        routes
            .matches(message.path())
            .next()
            .map(|hit| (hit.handler, hit.params))
    }

    async fn report_unroutable(&self, message: &Message) {
        warn!(subsystem = %self.name(), path = %message.path(), "unroutable message");
        let Some(services) = self.services() else {
            return;
        };
        services.errors.record(
            RawFault::new(format!("no route for {}", message.path()))
                .with_kind(FaultKind::Unroutable)
                .with_subsystem(self.name())
                .with_metadata("messageId", json!(message.id().to_string())),
        );
        services
            .dead_letters
            .add(message.clone(), DeadLetterReason::Unroutable);
        if message.meta().response_required {
            self.send_error_reply(message, "unroutable").await;
        }
    }

    async fn handle_failure(&self, message: Message, error: HandlerError) {
        let Some(services) = self.services() else {
            warn!(subsystem = %self.name(), "handler failed with no services bound: {error}");
            return;
        };

        services.errors.record(
            RawFault::new(error.detail.clone())
                .with_kind(error.kind)
                .with_subsystem(self.name())
                .with_metadata("messageId", json!(message.id().to_string()))
                .with_metadata("path", json!(message.path().to_string())),
        );

        let retryable = error.kind == FaultKind::Internal
            && message.kind() != MessageKind::Atomic
            && !message.custom_flag("noRetry");

        if retryable && message.meta().retry_count < message.meta().max_retries {
            self.schedule_retry(&message);
            return;
        }

        if retryable {
            // Budget exhausted.
            services.errors.record(
                RawFault::new(format!(
                    "retry budget exhausted after {} attempts",
                    message.meta().retry_count
                ))
                .with_kind(FaultKind::MaxRetries)
                .with_subsystem(self.name())
                .with_metadata("messageId", json!(message.id().to_string())),
            );
            services
                .dead_letters
                .add(message.clone(), DeadLetterReason::MaxRetries);
            if message.meta().response_required {
                self.send_error_reply(&message, "maxretries").await;
            }
            return;
        }

        if message.meta().response_required {
            self.send_error_reply(&message, &error.kind.to_string()).await;
        }
    }

    /// A retry is a new message: fresh id, kind `Retry`, incremented
    /// retry count, original id carried in custom metadata, and the
    /// original correlation id so late replies still pair up.
    fn schedule_retry(&self, message: &Message) {
        let Some(services) = self.services() else {
            return;
        };

        let mut draft = services
            .factory
            .draft_for(message.path().clone(), message.body().clone());
        draft.kind = MessageKind::Retry;
        draft.meta.retry_count = message.meta().retry_count + 1;
        draft.meta.max_retries = message.meta().max_retries;
        draft.meta.correlation_id = Some(message.correlation_id());
        draft.meta.reply_to = message.meta().reply_to.clone();
        draft.meta.response_required = message.meta().response_required;
        draft.meta.transaction_id = message.meta().transaction_id;
        draft.meta.seq = message.meta().seq;
        draft.meta.priority = message.meta().priority;
        draft.meta.ttl = message.meta().ttl;
        draft.custom = message.custom_snapshot();
        let original_id = message
            .custom_get("originalId")
            .unwrap_or_else(|| json!(message.id().to_string()));
        draft.custom.insert("originalId".to_string(), original_id);
        let retry = draft.build();

        let attempt = retry.meta().retry_count;
        let delay = retry_backoff(attempt);
        self.inner.stats.record_retry();
        debug!(
            subsystem = %self.name(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );

        let subsystem = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let outcome = subsystem.accept(retry).await;
            if outcome == super::base::AcceptOutcome::Rejected {
                if let Some(services) = subsystem.services() {
                    services.errors.record(
                        RawFault::new("retry enqueue rejected")
                            .with_kind(FaultKind::Internal)
                            .with_subsystem(subsystem.name()),
                    );
                }
            }
        });
    }

    async fn send_reply(&self, original: &Message, body: Value) {
        let Some(services) = self.services() else {
            return;
        };
        let Some(reply_to) = original.meta().reply_to.clone() else {
            return;
        };

        let mut draft = services.factory.draft_for(reply_to, body);
        draft.kind = MessageKind::Response;
        draft.meta.in_reply_to = Some(original.correlation_id());
        let reply = draft.build();
        if let Some(identity) = self.identity() {
            reply.custom_set("callerId", json!(identity.id().to_string()));
        }
        services.deliver_reply(reply).await;
    }

    async fn send_error_reply(&self, original: &Message, reason: &str) {
        let Some(services) = self.services() else {
            return;
        };
        let Some(reply_to) = original.meta().reply_to.clone() else {
            return;
        };

        let body = json!({
            "correlationId": original.correlation_id().to_string(),
            "reason": reason,
        });
        let mut draft = services.factory.draft_for(reply_to, body);
        draft.kind = MessageKind::Error;
        draft.meta.in_reply_to = Some(original.correlation_id());
        let reply = draft.build();
        if let Some(identity) = self.identity() {
            reply.custom_set("callerId", json!(identity.id().to_string()));
        }
        services.deliver_reply(reply).await;
    }

    /// Dead-letter transaction buffers whose gap never arrived.
    fn expire_stale_transactions(&self) {
        let expired: Vec<(crate::util::TransactionId, Vec<Message>)> = {
            let mut txns = self.inner.txns.lock();
            let stale: Vec<_> = txns
                .iter()
                .filter(|(_, buffer)| {
                    !buffer.pending.is_empty()
                        && buffer.last_arrival.elapsed() > TXN_BUFFER_TIMEOUT
                })
                .map(|(txn, _)| *txn)
                .collect();
            stale
                .into_iter()
                .filter_map(|txn| {
                    txns.remove(&txn)
                        .map(|buffer| (txn, buffer.pending.into_values().collect()))
                })
                .collect()
        };

        if expired.is_empty() {
            return;
        }
        let Some(services) = self.services() else {
            return;
        };
        for (txn, members) in expired {
            services.errors.record(
                RawFault::new(format!("transaction {txn} timed out with incomplete prefix"))
                    .with_kind(FaultKind::Timeout)
                    .with_subsystem(self.name()),
            );
            for member in members {
                services
                    .dead_letters
                    .add(member, DeadLetterReason::TransactionTimeout);
            }
        }
    }
}
