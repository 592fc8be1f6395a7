//! End-to-end scenarios for the message kernel: delivery, backpressure,
//! unroutable handling, request/response timeouts, access control, and
//! transaction ordering.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use plexus_rt::fault::{DeadLetterReason, FaultKind, Severity};
use plexus_rt::message::BatchSpec;
use plexus_rt::prelude::*;
use plexus_rt::subsystem::AcceptOutcome;
use plexus_rt::system::DeliveryMode;

/// A system with the scheduler left stopped so tests drive ticks manually.
fn manual_system() -> MessageSystem {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("plexus_rt=debug")
        .with_test_writer()
        .try_init();
    let config = KernelConfig::builder()
        .with_auto_start(false)
        .build()
        .expect("valid config");
    let system = MessageSystem::new("test", config).expect("valid system");
    system.bootstrap().expect("bootstrap");
    system
}

/// Subsystem capturing every message its single route receives.
fn capturing_subsystem(
    name: &str,
    route: &str,
    capacity: usize,
    seen: Arc<Mutex<Vec<Message>>>,
) -> Subsystem {
    let subsystem = Subsystem::builder(name)
        .with_capacity(capacity)
        .finish()
        .expect("subsystem");
    subsystem
        .register_route(
            route,
            route_fn(move |msg, _params, _ctx| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(msg);
                    Ok(HandlerOutcome::done())
                }
            }),
            RouteOptions::default(),
        )
        .expect("route");
    subsystem.build().expect("build");
    subsystem
}

async fn drain(system: &MessageSystem) {
    let scheduler = system.scheduler().expect("scheduler");
    while scheduler.run_once().await.is_some() {}
}

// S1: register svc with an echo route, send as kernel, expect delivery
// and clean statistics after one scheduler tick.
#[tokio::test]
async fn happy_path_delivers_and_counts() {
    let system = manual_system();

    let subsystem = Subsystem::builder("svc")
        .with_capacity(4)
        .finish()
        .expect("subsystem");
    subsystem
        .register_route(
            "svc://echo",
            route_fn(|msg, _params, _ctx| async move {
                Ok(HandlerOutcome::reply(json!({ "ok": true, "body": msg.body().clone() })))
            }),
            RouteOptions::default(),
        )
        .expect("route");
    subsystem.build().expect("build");
    system.register_subsystem(subsystem.clone()).expect("register");

    let msg = system
        .factory()
        .create("svc://echo", json!({ "x": 1 }))
        .expect("message");
    let receipt = system.send(msg, &system.kernel_pkr()).await.expect("send");
    assert_eq!(receipt.subsystem, "svc");
    assert_eq!(receipt.mode, DeliveryMode::Queued);

    let (name, report) = system
        .scheduler()
        .expect("scheduler")
        .run_once()
        .await
        .expect("tick served someone");
    assert_eq!(name, "svc");
    assert_eq!(report.processed, 1);

    let stats = subsystem.stats().snapshot();
    assert_eq!(stats.messages_processed, 1);
    assert_eq!(stats.processing_errors, 0);
}

// S2: a path with no matching route reaches the processor, is never
// handled, and lands in the dead-letter queue with one warn-level record.
#[tokio::test]
async fn unroutable_message_is_quarantined() {
    let system = manual_system();
    let seen = Arc::new(Mutex::new(Vec::new()));
    system
        .register_subsystem(capturing_subsystem("svc", "svc://echo", 4, Arc::clone(&seen)))
        .expect("register");

    let msg = system
        .factory()
        .create("svc://unknown", json!(null))
        .expect("message");
    system.send(msg, &system.kernel_pkr()).await.expect("send");
    drain(&system).await;

    assert!(seen.lock().is_empty(), "no handler invocation expected");

    let services = system.services().expect("services");
    let letters = services.dead_letters.recent(0);
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].reason, DeadLetterReason::Unroutable);

    let records = services.errors.query_recent(&plexus_rt::fault::ErrorQuery {
        kind: Some(FaultKind::Unroutable),
        subsystem: Some("svc".to_string()),
        limit: 0,
    });
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].severity, Severity::Warn);
}

// S3: capacity 2, scheduler stopped: the third accept is rejected and the
// mailbox records exactly one queue-full event.
#[tokio::test]
async fn full_mailbox_rejects_third_message() {
    let system = manual_system();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let subsystem = capturing_subsystem("svc", "svc://op", 2, seen);
    system.register_subsystem(subsystem.clone()).expect("register");

    let factory = system.factory();
    for _ in 0..2 {
        let msg = factory.create("svc://op", json!(null)).expect("message");
        assert_eq!(subsystem.accept(msg).await, AcceptOutcome::Queued);
    }

    let third = factory.create("svc://op", json!(null)).expect("message");
    assert_eq!(subsystem.accept(third).await, AcceptOutcome::Rejected);
    assert_eq!(subsystem.mailbox_metrics().queue_full_events(), 1);
    assert_eq!(subsystem.queue_len(), 2);
}

// S4: a handler that never replies: after the timeout, the caller's reply
// route receives an error-kind message carrying the correlation id, and
// the pending table drains back to zero.
#[tokio::test]
async fn request_without_reply_times_out() {
    let system = manual_system();

    // Target subsystem whose handler never produces a reply body.
    let slow = Subsystem::builder("svc").finish().expect("subsystem");
    slow.register_route(
        "svc://slow",
        route_fn(|_msg, _params, _ctx| async { Ok(HandlerOutcome::done()) }),
        RouteOptions::default(),
    )
    .expect("route");
    slow.build().expect("build");
    system.register_subsystem(slow).expect("register svc");

    // Caller subsystem capturing what lands on its reply route.
    let replies = Arc::new(Mutex::new(Vec::new()));
    system
        .register_subsystem(capturing_subsystem(
            "caller",
            "caller://reply",
            4,
            Arc::clone(&replies),
        ))
        .expect("register caller");

    let kernel = system.kernel_pkr();
    let request = system
        .factory()
        .draft("svc://slow", json!(null))
        .expect("draft")
        .with_response_required()
        .with_reply_to("caller://reply".parse().expect("path"))
        .build();
    let correlation = request.id();

    system
        .send_with(
            request,
            &kernel,
            SendOptions::with_timeout(Duration::from_millis(50)),
        )
        .await
        .expect("send");

    let services = system.services().expect("services");
    assert_eq!(services.responses.pending_for(&kernel.id()), 1);

    // Process the request (no reply is produced), then let the deadline
    // fire and deliver the synthesized notice.
    drain(&system).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    drain(&system).await;

    let replies = replies.lock();
    assert_eq!(replies.len(), 1);
    let notice = &replies[0];
    assert_eq!(notice.kind(), MessageKind::Error);
    assert_eq!(notice.body()["correlationId"], correlation.to_string());
    assert_eq!(notice.body()["reason"], "timeout");
    assert_eq!(services.responses.pending_for(&kernel.id()), 0);
}

// S5: a principal with no write grant is refused before anything is
// enqueued; the denial is recorded and dead-lettered.
#[tokio::test]
async fn send_without_write_grant_is_denied() {
    let system = manual_system();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let subsystem = capturing_subsystem("svc", "svc://op", 4, seen);
    system.register_subsystem(subsystem.clone()).expect("register");

    let outsider = system
        .principals()
        .mint(PrincipalKind::Friend, "outsider", None)
        .expect("principal");

    let msg = system
        .factory()
        .create("svc://op", json!(null))
        .expect("message");
    let error = system.send(msg, &outsider).await.expect_err("must deny");
    assert_eq!(error.to_string(), "access denied");
    assert_eq!(subsystem.queue_len(), 0);

    let services = system.services().expect("services");
    let denials = services.errors.query_recent(&plexus_rt::fault::ErrorQuery {
        kind: Some(FaultKind::AuthFailed),
        subsystem: None,
        limit: 0,
    });
    assert_eq!(denials.len(), 1);
    assert_eq!(services.dead_letters.len(), 1);
    assert_eq!(
        services.dead_letters.recent(1)[0].reason,
        DeadLetterReason::AuthFailed
    );
}

// Property 4 (access monotonicity): a grant opens the path, a revocation
// closes it for every subsequent send.
#[tokio::test]
async fn revocation_denies_subsequent_sends() {
    let system = manual_system();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let subsystem = capturing_subsystem("svc", "svc://op", 8, seen);
    let svc_identity = system.register_subsystem(subsystem).expect("register");

    let peer = system
        .principals()
        .mint(PrincipalKind::Friend, "peer", None)
        .expect("principal");
    let factory = system.factory();

    system
        .access()
        .grant(&svc_identity, &peer, AccessMode::Write)
        .expect("grant");
    let msg = factory.create("svc://op", json!(1)).expect("message");
    assert!(system.send(msg, &peer).await.is_ok());

    system
        .access()
        .revoke(&svc_identity, &peer, AccessMode::Write)
        .expect("revoke");
    let msg = factory.create("svc://op", json!(2)).expect("message");
    let error = system.send(msg, &peer).await.expect_err("must deny");
    assert_eq!(error.to_string(), "access denied");
}

// S6: a three-message transaction submitted out of order (1, 0, 2) is
// observed by the handler in seq order and completes exactly once.
#[tokio::test]
async fn transaction_batch_reorders_to_seq_order() {
    let system = manual_system();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let subsystem = capturing_subsystem("svc", "svc://step", 8, Arc::clone(&seen));
    system.register_subsystem(subsystem.clone()).expect("register");

    let mut batch = system.factory().transaction_batch(vec![
        BatchSpec::parse("svc://step", json!({ "n": 0 })).expect("spec"),
        BatchSpec::parse("svc://step", json!({ "n": 1 })).expect("spec"),
        BatchSpec::parse("svc://step", json!({ "n": 2 })).expect("spec"),
    ]);
    let kernel = system.kernel_pkr();

    let last = batch.pop().expect("seq 2");
    let middle = batch.pop().expect("seq 1");
    let first = batch.pop().expect("seq 0");
    for msg in [middle, first, last] {
        system.send(msg, &kernel).await.expect("send");
    }
    drain(&system).await;

    let observed: Vec<u64> = seen
        .lock()
        .iter()
        .map(|m| m.body()["n"].as_u64().unwrap_or(99))
        .collect();
    assert_eq!(observed, vec![0, 1, 2]);
    assert_eq!(subsystem.stats().transactions_completed(), 1);
}

// A completed handler body becomes a Response-kind reply correlated to
// the request (causal reply property).
#[tokio::test]
async fn handler_reply_resolves_pending_response() {
    let system = manual_system();

    let responder = Subsystem::builder("svc").finish().expect("subsystem");
    responder
        .register_route(
            "svc://double",
            route_fn(|msg, _params, _ctx| async move {
                let n = msg.body()["n"].as_u64().unwrap_or(0);
                Ok(HandlerOutcome::reply(json!({ "doubled": n * 2 })))
            }),
            RouteOptions::default(),
        )
        .expect("route");
    responder.build().expect("build");
    system.register_subsystem(responder).expect("register");

    let replies = Arc::new(Mutex::new(Vec::new()));
    system
        .register_subsystem(capturing_subsystem(
            "caller",
            "caller://reply",
            4,
            Arc::clone(&replies),
        ))
        .expect("register caller");

    let kernel = system.kernel_pkr();
    let request = system
        .factory()
        .draft("svc://double", json!({ "n": 21 }))
        .expect("draft")
        .with_response_required()
        .with_reply_to("caller://reply".parse().expect("path"))
        .build();
    let correlation = request.id();
    system.send(request, &kernel).await.expect("send");

    // First pass processes the request, second delivers the reply.
    drain(&system).await;
    drain(&system).await;

    let replies = replies.lock();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind(), MessageKind::Response);
    assert_eq!(replies[0].meta().in_reply_to, Some(correlation));
    assert_eq!(replies[0].body()["doubled"], 42);

    let services = system.services().expect("services");
    assert_eq!(services.responses.pending_for(&kernel.id()), 0);
}

// Kernel service routes: a subsystem grants a peer write access to itself
// through kernel://access/grant, which takes effect immediately.
#[tokio::test]
async fn kernel_access_routes_manage_grants() {
    let system = manual_system();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let subsystem = capturing_subsystem("svc", "svc://op", 8, seen);
    let svc_identity = system.register_subsystem(subsystem).expect("register");

    let peer = system
        .principals()
        .mint(PrincipalKind::Friend, "peer", None)
        .expect("principal");

    // Denied before the grant.
    let msg = system
        .factory()
        .create("svc://op", json!(null))
        .expect("message");
    assert!(system.send(msg, &peer).await.is_err());

    // The kernel subsystem is synchronous: the grant applies inline.
    let grant = system
        .factory()
        .create(
            "kernel://access/grant",
            json!({
                "ownerId": svc_identity.id().to_string(),
                "granteeId": peer.id().to_string(),
                "mode": "write",
            }),
        )
        .expect("message");
    let receipt = system.send(grant, &svc_identity).await.expect("grant send");
    assert_eq!(receipt.mode, DeliveryMode::Inline);

    let msg = system
        .factory()
        .create("svc://op", json!(null))
        .expect("message");
    assert!(system.send(msg, &peer).await.is_ok());
}

// Channel fan-out: a reply posted to a channel route is copied to every
// participant on its own subsystem.
#[tokio::test]
async fn channel_reply_fans_out_to_participants() {
    let system = manual_system();

    let svc_seen = Arc::new(Mutex::new(Vec::new()));
    let svc = capturing_subsystem("svc", "svc://updates", 8, Arc::clone(&svc_seen));
    let svc_identity = system.register_subsystem(svc).expect("register svc");

    let worker_seen = Arc::new(Mutex::new(Vec::new()));
    let worker = capturing_subsystem("worker", "worker://updates", 8, Arc::clone(&worker_seen));
    let worker_identity = system.register_subsystem(worker).expect("register worker");

    let services = system.services().expect("services");
    let channel_route: MessagePath = "svc://updates".parse().expect("path");
    services
        .channels
        .register_channel(channel_route.clone(), svc_identity.clone())
        .expect("channel");
    services
        .channels
        .add_participant(&channel_route, &svc_identity, &worker_identity)
        .expect("participant");

    // A reply posted to the channel by its owner.
    let reply = system
        .factory()
        .create("svc://updates", json!({ "v": 7 }))
        .expect("message");
    reply.custom_set("callerId", json!(svc_identity.id().to_string()));
    services.deliver_reply(reply).await;
    drain(&system).await;

    let worker_seen = worker_seen.lock();
    assert_eq!(worker_seen.len(), 1);
    assert_eq!(worker_seen[0].path().to_string(), "worker://updates");
    assert_eq!(worker_seen[0].body()["v"], 7);
}

// Internal handler errors are retried with a fresh id until the budget is
// spent, then the message is dead-lettered as maxretries.
#[tokio::test]
async fn internal_errors_retry_then_dead_letter() {
    let system = manual_system();

    let attempts = Arc::new(Mutex::new(Vec::new()));
    let subsystem = Subsystem::builder("svc").with_capacity(8).finish().expect("subsystem");
    let log = Arc::clone(&attempts);
    subsystem
        .register_route(
            "svc://flaky",
            route_fn(move |msg, _params, _ctx| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push((msg.id(), msg.meta().retry_count));
                    Err::<HandlerOutcome, _>(HandlerError::internal("boom"))
                }
            }),
            RouteOptions::default(),
        )
        .expect("route");
    subsystem.build().expect("build");
    system.register_subsystem(subsystem.clone()).expect("register");

    let msg = system
        .factory()
        .draft("svc://flaky", json!(null))
        .expect("draft")
        .with_max_retries(2)
        .build();
    let original_id = msg.id();
    system.send(msg, &system.kernel_pkr()).await.expect("send");

    // Retries are re-enqueued after short backoffs; keep draining until
    // the budget (1 original + 2 retries) is spent.
    for _ in 0..40 {
        drain(&system).await;
        if attempts.lock().len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let attempts = attempts.lock();
    assert_eq!(attempts.len(), 3, "one original plus two retries");
    let retry_counts: Vec<u32> = attempts.iter().map(|(_, count)| *count).collect();
    assert_eq!(retry_counts, vec![0, 1, 2]);
    // Retries are new messages carrying the original id in custom meta.
    assert_ne!(attempts[1].0, original_id);

    assert_eq!(subsystem.stats().retries_scheduled(), 2);
    let services = system.services().expect("services");
    let letters = services.dead_letters.recent(0);
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].reason, DeadLetterReason::MaxRetries);
    assert_eq!(
        letters[0].message.custom_get("originalId"),
        Some(json!(original_id.to_string()))
    );
}

// Disposing a subsystem drains its mailbox to the dead-letter queue with
// reason shutdown.
#[tokio::test]
async fn dispose_dead_letters_queued_messages() {
    let system = manual_system();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let subsystem = capturing_subsystem("svc", "svc://op", 8, seen);
    system.register_subsystem(subsystem.clone()).expect("register");

    let kernel = system.kernel_pkr();
    for _ in 0..3 {
        let msg = system
            .factory()
            .create("svc://op", json!(null))
            .expect("message");
        system.send(msg, &kernel).await.expect("send");
    }

    system.dispose_subsystem("svc").await.expect("dispose");

    let services = system.services().expect("services");
    let letters = services.dead_letters.recent(0);
    assert_eq!(letters.len(), 3);
    assert!(letters
        .iter()
        .all(|entry| entry.reason == DeadLetterReason::Shutdown));
}

// The background scheduler loop delivers without manual ticks.
#[tokio::test]
async fn auto_started_scheduler_processes_in_background() {
    let config = KernelConfig::builder().build().expect("config");
    let system = MessageSystem::new("auto", config).expect("system");
    system.bootstrap().expect("bootstrap");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let subsystem = capturing_subsystem("svc", "svc://op", 16, Arc::clone(&seen));
    system.register_subsystem(subsystem).expect("register");

    let kernel = system.kernel_pkr();
    for n in 0..5u64 {
        let msg = system
            .factory()
            .create("svc://op", json!({ "n": n }))
            .expect("message");
        system.send(msg, &kernel).await.expect("send");
    }

    for _ in 0..50 {
        if seen.lock().len() == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let observed: Vec<u64> = seen
        .lock()
        .iter()
        .map(|m| m.body()["n"].as_u64().unwrap_or(99))
        .collect();
    assert_eq!(observed, vec![0, 1, 2, 3, 4], "FIFO within the mailbox");

    system.shutdown().await;
}
