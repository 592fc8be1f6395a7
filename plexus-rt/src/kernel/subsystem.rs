//! Kernel subsystem implementation.
//!
//! The kernel is itself a subsystem named `kernel`, processed
//! synchronously so service calls complete inline. `send_protected` is the
//! only supported send path for non-kernel callers: it stamps the caller
//! identity (callers cannot spoof it), runs the access check before any
//! enqueue, and forwards allowed messages to the router.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::access::{AccessMode, PublicKeyRecord};
use crate::fault::{DeadLetterReason, ErrorQuery, FaultKind, RawFault};
use crate::message::{Message, MessageKind, MessagePath};
use crate::response::ReplyOptions;
use crate::route::{route_fn, HandlerError, HandlerOutcome, RouteOptions};
use crate::subsystem::{Subsystem, SubsystemError};
use crate::system::router::{RouteReceipt, RouterError};
use crate::system::services::CoreServices;
use crate::util::PrincipalId;

/// Kernel send-path errors.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The access check denied delivery.
    #[error("access denied")]
    AccessDenied,

    /// Routing failed after the access check passed.
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Per-send options.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Reply deadline for `response_required` messages; the system default
    /// applies when unset.
    pub response_timeout: Option<Duration>,
}

impl SendOptions {
    /// Options with an explicit response timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            response_timeout: Some(timeout),
        }
    }
}

fn principal_field(body: &Value, key: &str) -> Result<PrincipalId, HandlerError> {
    let raw = body
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::validation(format!("missing field {key}")))?;
    let uuid = Uuid::parse_str(raw)
        .map_err(|_| HandlerError::validation(format!("malformed principal id in {key}")))?;
    Ok(PrincipalId::from_uuid(uuid))
}

fn mode_field(body: &Value) -> Result<AccessMode, HandlerError> {
    match body.get("mode").and_then(Value::as_str) {
        Some("read") => Ok(AccessMode::Read),
        Some("write") => Ok(AccessMode::Write),
        _ => Err(HandlerError::validation("mode must be \"read\" or \"write\"")),
    }
}

fn caller_id(message: &Message) -> Option<PrincipalId> {
    let raw = message.custom_get("callerId")?;
    let uuid = Uuid::parse_str(raw.as_str()?).ok()?;
    Some(PrincipalId::from_uuid(uuid))
}

fn parse_fault_kind(raw: &str) -> Option<FaultKind> {
    match raw {
        "unroutable" => Some(FaultKind::Unroutable),
        "maxretries" => Some(FaultKind::MaxRetries),
        "timeout" => Some(FaultKind::Timeout),
        "auth_failed" => Some(FaultKind::AuthFailed),
        "validation" => Some(FaultKind::Validation),
        "internal" => Some(FaultKind::Internal),
        "external" => Some(FaultKind::External),
        "simple" => Some(FaultKind::Simple),
        "queue_evicted" => Some(FaultKind::QueueEvicted),
        _ => None,
    }
}

/// Root subsystem hosting the built-in services.
pub struct KernelSubsystem {
    subsystem: Subsystem,
    kernel_pkr: PublicKeyRecord,
    services: Arc<CoreServices>,
    service_principals: Vec<PublicKeyRecord>,
    default_response_timeout: Duration,
}

impl KernelSubsystem {
    /// Construct the kernel subsystem, mint its service principals, and
    /// register the service routes.
    ///
    /// # Errors
    ///
    /// Propagates subsystem composition failures.
    pub(crate) fn new(
        services: Arc<CoreServices>,
        default_response_timeout: Duration,
    ) -> Result<Self, SubsystemError> {
        let kernel_pkr = services.principals.kernel_pkr();
        let subsystem = Subsystem::builder("kernel")
            .synchronous(true)
            .finish_reserved()?;

        Self::register_service_routes(&subsystem, &services, &kernel_pkr)?;
        subsystem.build()?;
        subsystem.bind(kernel_pkr.clone(), Arc::clone(&services));
        services.access.ensure_owner(&kernel_pkr);

        // Service children live in the principal forest under the kernel.
        let mut service_principals = Vec::new();
        for name in [
            "access-control",
            "response-manager",
            "channel-manager",
            "error-manager",
            "dead-letter-manager",
        ] {
            if let Ok(pkr) = services.principals.mint(
                crate::access::PrincipalKind::Resource,
                name,
                Some(&kernel_pkr),
            ) {
                service_principals.push(pkr);
            }
        }

        Ok(Self {
            subsystem,
            kernel_pkr,
            services,
            service_principals,
            default_response_timeout,
        })
    }

    fn register_service_routes(
        subsystem: &Subsystem,
        services: &Arc<CoreServices>,
        kernel_pkr: &PublicKeyRecord,
    ) -> Result<(), SubsystemError> {
        let kernel_id = kernel_pkr.id();

        // access/grant and access/revoke: owner or kernel only.
        for (route, grant) in [("kernel://access/grant", true), ("kernel://access/revoke", false)] {
            let services = Arc::clone(services);
            subsystem.register_route(
                route,
                route_fn(move |msg, _p, _c| {
                    let services = Arc::clone(&services);
                    async move {
                        let owner_id = principal_field(msg.body(), "ownerId")?;
                        let grantee_id = principal_field(msg.body(), "granteeId")?;
                        let mode = mode_field(msg.body())?;

                        let caller = caller_id(&msg);
                        if caller != Some(owner_id) && caller != Some(kernel_id) {
                            return Err(HandlerError {
                                kind: FaultKind::AuthFailed,
                                detail: "only the owner may change its reader/writer set"
                                    .to_string(),
                            });
                        }

                        let owner = services
                            .principals
                            .pkr_of(&owner_id)
                            .ok_or_else(|| HandlerError::validation("unknown owner"))?;
                        let grantee = services
                            .principals
                            .pkr_of(&grantee_id)
                            .ok_or_else(|| HandlerError::validation("unknown grantee"))?;

                        let result = if grant {
                            services.access.grant(&owner, &grantee, mode)
                        } else {
                            services.access.revoke(&owner, &grantee, mode)
                        };
                        result.map_err(|e| HandlerError::validation(e.to_string()))?;
                        Ok(HandlerOutcome::reply(json!({ "ok": true })))
                    }
                }),
                RouteOptions::default(),
            )?;
        }

        // channel/register: the caller becomes the owner.
        {
            let services = Arc::clone(services);
            subsystem.register_route(
                "kernel://channel/register",
                route_fn(move |msg, _p, _c| {
                    let services = Arc::clone(&services);
                    async move {
                        let route_raw = msg
                            .body()
                            .get("route")
                            .and_then(Value::as_str)
                            .ok_or_else(|| HandlerError::validation("missing field route"))?;
                        let route = MessagePath::parse(route_raw)
                            .map_err(|e| HandlerError::validation(e.to_string()))?;
                        let caller = caller_id(&msg)
                            .and_then(|id| services.principals.pkr_of(&id))
                            .ok_or_else(|| HandlerError::validation("unknown caller"))?;
                        services
                            .channels
                            .register_channel(route, caller)
                            .map_err(|e| HandlerError::validation(e.to_string()))?;
                        Ok(HandlerOutcome::reply(json!({ "ok": true })))
                    }
                }),
                RouteOptions::default(),
            )?;
        }

        // channel/unregister: owner or kernel.
        {
            let services = Arc::clone(services);
            subsystem.register_route(
                "kernel://channel/unregister",
                route_fn(move |msg, _p, _c| {
                    let services = Arc::clone(&services);
                    async move {
                        let route_raw = msg
                            .body()
                            .get("route")
                            .and_then(Value::as_str)
                            .ok_or_else(|| HandlerError::validation("missing field route"))?;
                        let route = MessagePath::parse(route_raw)
                            .map_err(|e| HandlerError::validation(e.to_string()))?;
                        let caller = caller_id(&msg)
                            .and_then(|id| services.principals.pkr_of(&id))
                            .ok_or_else(|| HandlerError::validation("unknown caller"))?;
                        services.channels.unregister_channel(&route, &caller).map_err(
                            |e| HandlerError {
                                kind: FaultKind::AuthFailed,
                                detail: e.to_string(),
                            },
                        )?;
                        Ok(HandlerOutcome::reply(json!({ "ok": true })))
                    }
                }),
                RouteOptions::default(),
            )?;
        }

        // errors/recent: bounded query over the error store.
        {
            let services = Arc::clone(services);
            subsystem.register_route(
                "kernel://errors/recent",
                route_fn(move |msg, _p, _c| {
                    let services = Arc::clone(&services);
                    async move {
                        let query = ErrorQuery {
                            kind: msg
                                .body()
                                .get("kind")
                                .and_then(Value::as_str)
                                .and_then(parse_fault_kind),
                            subsystem: msg
                                .body()
                                .get("subsystem")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            limit: msg
                                .body()
                                .get("limit")
                                .and_then(Value::as_u64)
                                .unwrap_or(50) as usize,
                        };
                        let records = services.errors.query_recent(&query);
                        let body = serde_json::to_value(&records)
                            .map_err(|e| HandlerError::internal(e.to_string()))?;
                        Ok(HandlerOutcome::reply(json!({ "records": body })))
                    }
                }),
                RouteOptions::default(),
            )?;
        }

        // errors/summary: aggregated counts.
        {
            let services = Arc::clone(services);
            subsystem.register_route(
                "kernel://errors/summary",
                route_fn(move |msg, _p, _c| {
                    let services = Arc::clone(&services);
                    async move {
                        let limit = msg
                            .body()
                            .get("limit")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as usize;
                        let summary = services.errors.summary(limit);
                        let body = serde_json::to_value(&summary)
                            .map_err(|e| HandlerError::internal(e.to_string()))?;
                        Ok(HandlerOutcome::reply(body))
                    }
                }),
                RouteOptions::default(),
            )?;
        }

        // deadletter/recent: quarantined message descriptions.
        {
            let services = Arc::clone(services);
            subsystem.register_route(
                "kernel://deadletter/recent",
                route_fn(move |msg, _p, _c| {
                    let services = Arc::clone(&services);
                    async move {
                        let limit = msg
                            .body()
                            .get("limit")
                            .and_then(Value::as_u64)
                            .unwrap_or(50) as usize;
                        let entries: Vec<Value> = services
                            .dead_letters
                            .recent(limit)
                            .into_iter()
                            .map(|entry| {
                                json!({
                                    "reason": entry.reason.to_string(),
                                    "at": entry.at.to_rfc3339(),
                                    "message": entry.message.describe(),
                                })
                            })
                            .collect();
                        Ok(HandlerOutcome::reply(json!({ "entries": entries })))
                    }
                }),
                RouteOptions::default(),
            )?;
        }

        Ok(())
    }

    /// The kernel's own subsystem.
    pub fn subsystem(&self) -> &Subsystem {
        &self.subsystem
    }

    /// The kernel root identity.
    pub fn kernel_pkr(&self) -> PublicKeyRecord {
        self.kernel_pkr.clone()
    }

    /// Identities of the hosted service children.
    pub fn service_principals(&self) -> &[PublicKeyRecord] {
        &self.service_principals
    }

    fn target_identity(&self, path: &MessagePath) -> Option<PublicKeyRecord> {
        if path.subsystem() == self.subsystem.name() {
            return Some(self.kernel_pkr.clone());
        }
        self.services
            .registry
            .get(path.subsystem())
            .and_then(|subsystem| subsystem.identity())
    }

    /// The only supported send path for non-kernel callers.
    ///
    /// Stamps `callerId` (overwriting any prior value), checks write
    /// access against the target subsystem's owner identity, registers a
    /// pending response before routing when one is required, then
    /// forwards to the router.
    ///
    /// # Errors
    ///
    /// [`KernelError::AccessDenied`] on a failed check (recorded and
    /// dead-lettered); router failures are passed through after any
    /// required error reply is synthesized.
    pub async fn send_protected(
        &self,
        caller: &PublicKeyRecord,
        message: Message,
        options: SendOptions,
    ) -> Result<RouteReceipt, KernelError> {
        // Callers cannot spoof their identity.
        message.custom_set("callerId", json!(caller.id().to_string()));

        if let Some(target) = self.target_identity(message.path()) {
            if !self
                .services
                .access
                .can_access(caller, &target, AccessMode::Write)
            {
                warn!(
                    caller = %caller.id(),
                    path = %message.path(),
                    "send denied by access check"
                );
                self.services.errors.record(
                    RawFault::new(format!(
                        "caller {} denied write to {}",
                        caller.id(),
                        message.path().subsystem()
                    ))
                    .with_kind(FaultKind::AuthFailed)
                    .with_subsystem(message.path().subsystem())
                    .with_metadata("messageId", json!(message.id().to_string())),
                );
                if message.meta().response_required {
                    self.send_failure_notice(&message, "auth_failed").await;
                }
                self.services
                    .dead_letters
                    .add(message, DeadLetterReason::AuthFailed);
                return Err(KernelError::AccessDenied);
            }
        }

        // Register the pending entry before routing so replies produced
        // inline (synchronous or process-immediately targets) find it.
        let correlation = if message.meta().response_required {
            let timeout = options
                .response_timeout
                .unwrap_or(self.default_response_timeout);
            self.services.responses.register_response_required(
                caller,
                &message,
                ReplyOptions {
                    reply_to: None,
                    timeout,
                },
            )
        } else {
            None
        };

        let fallback = message.clone();
        match self.services.router.route(message).await {
            Ok(receipt) => {
                debug!(subsystem = %receipt.subsystem, "send delivered");
                Ok(receipt)
            }
            Err(error) => {
                if fallback.meta().response_required {
                    let reason = match &error {
                        RouterError::InvalidPath(_) => "invalid_path",
                        RouterError::UnknownSubsystem(_) => "unknown_subsystem",
                        RouterError::QueueFull(_) => "queue_full",
                        RouterError::NotAccepting(_) => "not_accepting",
                    };
                    if fallback.meta().reply_to.is_some() {
                        self.send_failure_notice(&fallback, reason).await;
                    } else if let Some(correlation) = correlation {
                        self.services.responses.cancel(correlation);
                    }
                }
                Err(KernelError::Router(error))
            }
        }
    }

    /// Synthesize an error-kind reply for a send that could not complete.
    async fn send_failure_notice(&self, original: &Message, reason: &str) {
        let Some(reply_to) = original.meta().reply_to.clone() else {
            return;
        };
        let body = json!({
            "correlationId": original.correlation_id().to_string(),
            "reason": reason,
        });
        let mut draft = self.services.factory.draft_for(reply_to, body);
        draft.kind = MessageKind::Error;
        draft.meta.in_reply_to = Some(original.correlation_id());
        let notice = draft.build();
        notice.custom_set("callerId", json!(self.kernel_pkr.id().to_string()));
        self.services.deliver_reply(notice).await;
    }
}

impl std::fmt::Debug for KernelSubsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelSubsystem")
            .field("kernel", &self.kernel_pkr.id())
            .field("services", &self.service_principals.len())
            .finish()
    }
}
