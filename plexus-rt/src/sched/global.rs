//! The global scheduler loop.
//!
//! A single tokio task repeatedly selects one subsystem via the configured
//! strategy and grants it a time slice. Slice outcomes feed back into the
//! candidate snapshots (served time, recent latency) that strategies see
//! on the next tick.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

// Layer 3: Internal module imports
use super::strategy::{SchedCandidate, SchedulerContext, SelectionStrategy};
use crate::subsystem::SliceReport;
use crate::system::registry::SubsystemRegistry;

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatsSnapshot {
    /// Ticks executed (including idle ones).
    pub ticks: u64,
    /// Slices granted.
    pub slices: u64,
    /// Slices granted per subsystem.
    pub serve_counts: HashMap<String, u64>,
}

struct SchedInner {
    registry: Arc<SubsystemRegistry>,
    strategy: Mutex<Box<dyn SelectionStrategy>>,
    time_slice: Duration,
    tick_interval: Duration,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
    ticks: AtomicU64,
    slices: AtomicU64,
    serve_counts: DashMap<String, u64>,
    served_micros: DashMap<String, u64>,
    recent_latency_micros: DashMap<String, u64>,
}

impl SchedInner {
    fn candidates(&self) -> (Vec<SchedCandidate>, Vec<crate::subsystem::Subsystem>) {
        let subsystems: Vec<_> = self
            .registry
            .all()
            .into_iter()
            .filter(|s| s.is_built() && !s.is_disposed())
            .collect();
        let candidates = subsystems
            .iter()
            .map(|s| SchedCandidate {
                name: s.name().to_string(),
                queue_len: s.queue_len(),
                weight: s.weight(),
                priority: s.priority(),
                served: Duration::from_micros(
                    self.served_micros.get(s.name()).map(|v| *v).unwrap_or(0),
                ),
                recent_latency: Duration::from_micros(
                    self.recent_latency_micros
                        .get(s.name())
                        .map(|v| *v)
                        .unwrap_or(0),
                ),
            })
            .collect();
        (candidates, subsystems)
    }

    async fn run_once(&self) -> Option<(String, SliceReport)> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
        let (candidates, subsystems) = self.candidates();
        if candidates.is_empty() {
            return None;
        }

        let selected = {
            let mut strategy = self.strategy.lock();
            strategy.select(&candidates, &SchedulerContext { tick })
        }?;
        let subsystem = subsystems.get(selected)?.clone();
        let name = subsystem.name().to_string();

        let report = subsystem.allocate_time_slice(self.time_slice).await;
        self.slices.fetch_add(1, Ordering::Relaxed);
        *self.serve_counts.entry(name.clone()).or_insert(0) += 1;
        *self.served_micros.entry(name.clone()).or_insert(0) +=
            report.elapsed.as_micros() as u64;
        if report.processed > 0 {
            self.recent_latency_micros.insert(
                name.clone(),
                report.elapsed.as_micros() as u64 / report.processed as u64,
            );
        }

        trace!(
            subsystem = %name,
            processed = report.processed,
            yielded = report.yielded,
            "time slice completed"
        );
        Some((name, report))
    }
}

/// Allocates time slices across registered subsystems.
///
/// Cheap to clone; clones share the loop task and counters. `start` and
/// `stop` are idempotent.
#[derive(Clone)]
pub struct GlobalScheduler {
    inner: Arc<SchedInner>,
}

impl GlobalScheduler {
    /// Create a scheduler over a registry with a resolved strategy.
    ///
    /// The tick interval is clamped to at least 1ms.
    pub fn new(
        registry: Arc<SubsystemRegistry>,
        strategy: Box<dyn SelectionStrategy>,
        time_slice: Duration,
        tick_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedInner {
                registry,
                strategy: Mutex::new(strategy),
                time_slice,
                tick_interval: tick_interval.max(Duration::from_millis(1)),
                running: AtomicBool::new(false),
                handle: Mutex::new(None),
                ticks: AtomicU64::new(0),
                slices: AtomicU64::new(0),
                serve_counts: DashMap::new(),
                served_micros: DashMap::new(),
                recent_latency_micros: DashMap::new(),
            }),
        }
    }

    /// Start the loop task. A second call is a no-op.
    pub fn start(&self) {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!("scheduler started");
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !inner.running.load(Ordering::Acquire) {
                    break;
                }
                inner.run_once().await;
            }
        });
        *self.inner.handle.lock() = Some(handle);
    }

    /// Stop the loop task. A second call is a no-op.
    pub fn stop(&self) {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(handle) = self.inner.handle.lock().take() {
            handle.abort();
        }
        debug!("scheduler stopped");
    }

    /// True while the loop task runs.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Execute one scheduling decision outside the loop task. Used by
    /// tests and by callers driving the system manually.
    pub async fn run_once(&self) -> Option<(String, SliceReport)> {
        self.inner.run_once().await
    }

    /// Scheduler counters.
    pub fn stats(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            ticks: self.inner.ticks.load(Ordering::Relaxed),
            slices: self.inner.slices.load(Ordering::Relaxed),
            serve_counts: self
                .inner
                .serve_counts
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for GlobalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalScheduler")
            .field("running", &self.is_running())
            .field("time_slice", &self.inner.time_slice)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests are allowed to use unwrap for simplicity
mod tests {
    use super::*;
    use crate::message::MessageFactory;
    use crate::route::{route_fn, HandlerOutcome, RouteOptions};
    use crate::sched::strategy::RoundRobin;
    use crate::subsystem::Subsystem;
    use serde_json::json;

    fn echo_subsystem(name: &str) -> Subsystem {
        let subsystem = Subsystem::builder(name).with_capacity(16).finish().unwrap();
        subsystem
            .register_route(
                &format!("{name}://op"),
                route_fn(|_m, _p, _c| async { Ok(HandlerOutcome::done()) }),
                RouteOptions::default(),
            )
            .unwrap();
        subsystem.build().unwrap();
        subsystem
    }

    fn scheduler(registry: Arc<SubsystemRegistry>) -> GlobalScheduler {
        GlobalScheduler::new(
            registry,
            Box::<RoundRobin>::default(),
            Duration::from_millis(10),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn test_run_once_with_no_work() {
        let registry = Arc::new(SubsystemRegistry::new());
        registry.insert(echo_subsystem("svc")).unwrap();
        let scheduler = scheduler(registry);

        assert!(scheduler.run_once().await.is_none());
        assert_eq!(scheduler.stats().ticks, 1);
        assert_eq!(scheduler.stats().slices, 0);
    }

    #[tokio::test]
    async fn test_run_once_drains_queue() {
        let registry = Arc::new(SubsystemRegistry::new());
        let subsystem = echo_subsystem("svc");
        registry.insert(subsystem.clone()).unwrap();
        let scheduler = scheduler(registry);

        let factory = MessageFactory::new();
        for _ in 0..3 {
            subsystem
                .accept(factory.create("svc://op", json!(null)).unwrap())
                .await;
        }

        let (name, report) = scheduler.run_once().await.unwrap();
        assert_eq!(name, "svc");
        assert_eq!(report.processed, 3);
        assert_eq!(subsystem.stats().messages_processed(), 3);
    }

    #[tokio::test]
    async fn test_round_robin_serve_counts_balanced() {
        let registry = Arc::new(SubsystemRegistry::new());
        let a = echo_subsystem("aaa");
        let b = echo_subsystem("bbb");
        registry.insert(a.clone()).unwrap();
        registry.insert(b.clone()).unwrap();
        let scheduler = scheduler(registry);

        let factory = MessageFactory::new();
        // Keep both ready across every tick: one message each per round.
        for _ in 0..4 {
            a.accept(factory.create("aaa://op", json!(null)).unwrap())
                .await;
            b.accept(factory.create("bbb://op", json!(null)).unwrap())
                .await;
            scheduler.run_once().await.unwrap();
            scheduler.run_once().await.unwrap();
        }

        let counts = scheduler.stats().serve_counts;
        let ca = counts.get("aaa").copied().unwrap_or(0);
        let cb = counts.get("bbb").copied().unwrap_or(0);
        assert_eq!(ca + cb, 8);
        assert!(ca.abs_diff(cb) <= 1, "serve counts {ca} vs {cb}");
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let registry = Arc::new(SubsystemRegistry::new());
        let scheduler = scheduler(registry);

        assert!(!scheduler.is_running());
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());

        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_loop_processes_in_background() {
        let registry = Arc::new(SubsystemRegistry::new());
        let subsystem = echo_subsystem("svc");
        registry.insert(subsystem.clone()).unwrap();
        let scheduler = scheduler(registry);

        let factory = MessageFactory::new();
        for _ in 0..5 {
            subsystem
                .accept(factory.create("svc://op", json!(null)).unwrap())
                .await;
        }

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop();

        assert_eq!(subsystem.stats().messages_processed(), 5);
    }
}
