//! Subsystem selection strategies.
//!
//! Strategies receive a name-sorted candidate snapshot and pick the index
//! of the subsystem to serve next. A candidate is *ready* when its mailbox
//! is non-empty; every built-in ignores idle candidates. Custom strategies
//! register by name at startup only.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::time::Duration;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
// (none)

/// Snapshot of one subsystem handed to a strategy.
#[derive(Debug, Clone)]
pub struct SchedCandidate {
    /// Subsystem name; candidates arrive name-sorted.
    pub name: String,
    /// Current mailbox depth.
    pub queue_len: usize,
    /// Configured scheduling weight.
    pub weight: f64,
    /// Configured scheduling priority.
    pub priority: u8,
    /// Cumulative wall-clock time served so far.
    pub served: Duration,
    /// Average per-message latency of the most recent slice.
    pub recent_latency: Duration,
}

impl SchedCandidate {
    /// True when the candidate has queued work.
    pub fn is_ready(&self) -> bool {
        self.queue_len > 0
    }
}

/// Context handed to strategies alongside the candidates.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerContext {
    /// Monotonic scheduler tick counter.
    pub tick: u64,
}

/// Picks the next subsystem to serve.
pub trait SelectionStrategy: Send {
    /// Strategy name for diagnostics.
    fn name(&self) -> &str;

    /// Return the index of the candidate to serve, or `None` when no
    /// candidate is ready.
    fn select(&mut self, candidates: &[SchedCandidate], ctx: &SchedulerContext) -> Option<usize>;
}

/// Strict rotation over ready candidates.
///
/// Over any window of N ticks with k ready subsystems, serve counts differ
/// by at most one.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl SelectionStrategy for RoundRobin {
    fn name(&self) -> &str {
        "round-robin"
    }

    fn select(&mut self, candidates: &[SchedCandidate], _ctx: &SchedulerContext) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        for offset in 0..candidates.len() {
            let idx = (self.cursor + offset) % candidates.len();
            if candidates[idx].is_ready() {
                self.cursor = idx + 1;
                return Some(idx);
            }
        }
        None
    }
}

/// Smooth weighted rotation: each ready candidate accrues credit equal to
/// its weight; the highest credit is served and pays back the round total.
#[derive(Debug, Default)]
pub struct Weighted {
    credits: HashMap<String, f64>,
}

impl SelectionStrategy for Weighted {
    fn name(&self) -> &str {
        "weighted"
    }

    fn select(&mut self, candidates: &[SchedCandidate], _ctx: &SchedulerContext) -> Option<usize> {
        let ready: Vec<usize> = (0..candidates.len())
            .filter(|&i| candidates[i].is_ready())
            .collect();
        if ready.is_empty() {
            return None;
        }

        let mut total = 0.0;
        for &i in &ready {
            let candidate = &candidates[i];
            *self.credits.entry(candidate.name.clone()).or_insert(0.0) += candidate.weight;
            total += candidate.weight;
        }

        let winner = ready
            .iter()
            .copied()
            .max_by(|&a, &b| {
                let ca = self.credits.get(&candidates[a].name).copied().unwrap_or(0.0);
                let cb = self.credits.get(&candidates[b].name).copied().unwrap_or(0.0);
                ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
            })?;

        if let Some(credit) = self.credits.get_mut(&candidates[winner].name) {
            *credit -= total;
        }
        Some(winner)
    }
}

/// Highest configured priority wins; name order breaks ties.
#[derive(Debug, Default)]
pub struct Priority;

impl SelectionStrategy for Priority {
    fn name(&self) -> &str {
        "priority"
    }

    fn select(&mut self, candidates: &[SchedCandidate], _ctx: &SchedulerContext) -> Option<usize> {
        (0..candidates.len())
            .filter(|&i| candidates[i].is_ready())
            .max_by_key(|&i| (candidates[i].priority, std::cmp::Reverse(i)))
    }
}

/// Smallest served-time-to-weight ratio wins.
#[derive(Debug, Default)]
pub struct FairShare;

impl SelectionStrategy for FairShare {
    fn name(&self) -> &str {
        "fair-share"
    }

    fn select(&mut self, candidates: &[SchedCandidate], _ctx: &SchedulerContext) -> Option<usize> {
        (0..candidates.len())
            .filter(|&i| candidates[i].is_ready())
            .min_by(|&a, &b| {
                let ra = candidates[a].served.as_secs_f64() / candidates[a].weight;
                let rb = candidates[b].served.as_secs_f64() / candidates[b].weight;
                ra.partial_cmp(&rb).unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

/// Deepest mailbox wins.
#[derive(Debug, Default)]
pub struct QueueDepth;

impl SelectionStrategy for QueueDepth {
    fn name(&self) -> &str {
        "queue-depth"
    }

    fn select(&mut self, candidates: &[SchedCandidate], _ctx: &SchedulerContext) -> Option<usize> {
        (0..candidates.len())
            .filter(|&i| candidates[i].is_ready())
            .max_by_key(|&i| (candidates[i].queue_len, std::cmp::Reverse(i)))
    }
}

/// Combines queue depth with recent per-message latency: deep, fast
/// subsystems score highest.
#[derive(Debug, Default)]
pub struct Adaptive;

impl SelectionStrategy for Adaptive {
    fn name(&self) -> &str {
        "adaptive"
    }

    fn select(&mut self, candidates: &[SchedCandidate], _ctx: &SchedulerContext) -> Option<usize> {
        (0..candidates.len())
            .filter(|&i| candidates[i].is_ready())
            .max_by(|&a, &b| {
                let score = |i: usize| {
                    let c = &candidates[i];
                    c.queue_len as f64 / (1.0 + c.recent_latency.as_millis() as f64)
                };
                score(a)
                    .partial_cmp(&score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

/// Factory producing a boxed strategy instance.
pub type StrategyFactory = Box<dyn Fn() -> Box<dyn SelectionStrategy> + Send + Sync>;

/// Named strategy registry resolved once at bootstrap.
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    /// Registry seeded with the built-in strategies.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("round-robin", || {
            Box::<RoundRobin>::default() as Box<dyn SelectionStrategy>
        });
        registry.register("weighted", || {
            Box::<Weighted>::default() as Box<dyn SelectionStrategy>
        });
        registry.register("priority", || {
            Box::<Priority>::default() as Box<dyn SelectionStrategy>
        });
        registry.register("fair-share", || {
            Box::<FairShare>::default() as Box<dyn SelectionStrategy>
        });
        registry.register("queue-depth", || {
            Box::<QueueDepth>::default() as Box<dyn SelectionStrategy>
        });
        registry.register("adaptive", || {
            Box::<Adaptive>::default() as Box<dyn SelectionStrategy>
        });
        registry
    }

    /// Register (or replace) a strategy constructor by name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn SelectionStrategy> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Instantiate a strategy by name.
    pub fn create(&self, name: &str) -> Option<Box<dyn SelectionStrategy>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("names", &self.names())
            .finish()
    }
}
