//! Trie-based route matching.
//!
//! Patterns are stored segment-by-segment. Matching collects every entry
//! that covers the path and yields them ordered by longest literal match,
//! then higher priority, then earlier registration.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use super::handler::{RouteHandler, RouteParams};
use crate::message::{MessagePath, Segment};

/// Route registration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The identical pattern is already registered and `overwrite` was not
    /// set.
    #[error("pattern already registered: {0}")]
    DuplicatePattern(String),
}

/// Options for one route registration.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Tie-breaker among equally specific matches; higher wins.
    pub priority: i32,
    /// Human-readable description for diagnostics.
    pub description: Option<String>,
    /// Replace an identical existing pattern instead of rejecting it.
    pub overwrite: bool,
}

impl RouteOptions {
    /// Options with a priority and defaults elsewhere.
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
struct RouteEntry {
    handler: Arc<dyn RouteHandler>,
    priority: i32,
    #[allow(dead_code)] // surfaced through diagnostics only
    description: Option<String>,
    order: u64,
    pattern: MessagePath,
}

/// One match yielded by [`RouteTree::matches`].
#[derive(Clone)]
pub struct RouteMatch {
    /// The registered handler.
    pub handler: Arc<dyn RouteHandler>,
    /// Parameters bound from `{name}` placeholders.
    pub params: RouteParams,
    /// The pattern that matched.
    pub pattern: MessagePath,
    /// The registered priority.
    pub priority: i32,
}

impl std::fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMatch")
            .field("pattern", &self.pattern.to_string())
            .field("params", &self.params)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Iterator over matches in delivery order.
pub struct RouteMatches {
    inner: std::vec::IntoIter<RouteMatch>,
}

impl RouteMatches {
    /// Number of matches remaining.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when nothing matched: the message is unroutable.
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

impl Iterator for RouteMatches {
    type Item = RouteMatch;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

#[derive(Default)]
struct Node {
    literals: HashMap<String, Node>,
    params: HashMap<String, Node>,
    wildcard: Option<Box<Node>>,
    /// Entry terminating exactly at this node.
    entry: Option<RouteEntry>,
    /// Entry whose final segment was `**`, anchored at this node.
    tail: Option<RouteEntry>,
}

/// Path-pattern trie for one subsystem.
///
/// # Example
/// ```rust
/// use plexus_rt::route::{route_fn, HandlerOutcome, RouteOptions, RouteTree};
/// use plexus_rt::message::MessagePath;
///
/// let mut tree = RouteTree::new();
/// let handler = route_fn(|_m, _p, _c| async { Ok(HandlerOutcome::done()) });
///
/// let pattern = MessagePath::parse("svc://orders/{id}").unwrap();
/// tree.register(&pattern, handler, RouteOptions::default()).unwrap();
///
/// let path = MessagePath::parse("svc://orders/42").unwrap();
/// let hit = tree.matches(&path).next().unwrap();
/// assert_eq!(hit.params.get("id"), Some("42"));
/// ```
#[derive(Default)]
pub struct RouteTree {
    root: Node,
    next_order: u64,
    len: usize,
}

fn segment_text(segment: &Segment) -> String {
    match segment {
        Segment::Literal(s) => s.clone(),
        other => other.to_string(),
    }
}

impl RouteTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered patterns.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no patterns are registered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Register a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::DuplicatePattern`] when the identical pattern
    /// already holds a handler and `overwrite` is false.
    pub fn register(
        &mut self,
        pattern: &MessagePath,
        handler: Arc<dyn RouteHandler>,
        options: RouteOptions,
    ) -> Result<(), RouteError> {
        let mut node = &mut self.root;
        let mut is_tail = false;

        for segment in pattern.segments() {
            match segment {
                Segment::Literal(s) => {
                    node = node.literals.entry(s.clone()).or_default();
                }
                Segment::Param(name) => {
                    node = node.params.entry(name.clone()).or_default();
                }
                Segment::Wildcard => {
                    node = node.wildcard.get_or_insert_with(Box::default);
                }
                Segment::TailWildcard => {
                    // Path parsing guarantees this is the final segment.
                    is_tail = true;
                }
            }
        }

        let slot = if is_tail { &mut node.tail } else { &mut node.entry };
        if slot.is_some() && !options.overwrite {
            return Err(RouteError::DuplicatePattern(pattern.to_string()));
        }

        let replacing = slot.is_some();
        *slot = Some(RouteEntry {
            handler,
            priority: options.priority,
            description: options.description,
            order: self.next_order,
            pattern: pattern.clone(),
        });
        self.next_order += 1;
        if !replacing {
            self.len += 1;
        }
        Ok(())
    }

    /// Collect every entry covering `path`, ordered by longest literal
    /// match, then priority, then registration order.
    pub fn matches(&self, path: &MessagePath) -> RouteMatches {
        let segments: Vec<String> = path.segments().iter().map(segment_text).collect();
        let mut hits: Vec<(usize, u64, RouteMatch)> = Vec::new();
        Self::collect(&self.root, &segments, 0, 0, &RouteParams::new(), &mut hits);

        hits.sort_by(|(la, oa, a), (lb, ob, b)| {
            lb.cmp(la)
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| oa.cmp(ob))
        });

        RouteMatches {
            inner: hits
                .into_iter()
                .map(|(_, _, m)| m)
                .collect::<Vec<_>>()
                .into_iter(),
        }
    }

    fn collect(
        node: &Node,
        segments: &[String],
        idx: usize,
        literals: usize,
        params: &RouteParams,
        out: &mut Vec<(usize, u64, RouteMatch)>,
    ) {
        if let Some(tail) = &node.tail {
            out.push((
                literals,
                tail.order,
                RouteMatch {
                    handler: Arc::clone(&tail.handler),
                    params: params.clone(),
                    pattern: tail.pattern.clone(),
                    priority: tail.priority,
                },
            ));
        }

        if idx == segments.len() {
            if let Some(entry) = &node.entry {
                out.push((
                    literals,
                    entry.order,
                    RouteMatch {
                        handler: Arc::clone(&entry.handler),
                        params: params.clone(),
                        pattern: entry.pattern.clone(),
                        priority: entry.priority,
                    },
                ));
            }
            return;
        }

        let segment = &segments[idx];

        if let Some(child) = node.literals.get(segment) {
            Self::collect(child, segments, idx + 1, literals + 1, params, out);
        }
        for (name, child) in &node.params {
            let mut bound = params.clone();
            bound.insert(name.clone(), segment.clone());
            Self::collect(child, segments, idx + 1, literals, &bound, out);
        }
        if let Some(child) = &node.wildcard {
            Self::collect(child, segments, idx + 1, literals, params, out);
        }
    }
}

impl std::fmt::Debug for RouteTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTree").field("len", &self.len).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests are allowed to use unwrap for simplicity
mod tests {
    use super::*;
    use crate::route::handler::{route_fn, HandlerOutcome};

    fn noop() -> Arc<dyn RouteHandler> {
        route_fn(|_m, _p, _c| async { Ok(HandlerOutcome::done()) })
    }

    fn path(s: &str) -> MessagePath {
        MessagePath::parse(s).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let mut tree = RouteTree::new();
        tree.register(&path("svc://echo"), noop(), RouteOptions::default())
            .unwrap();

        let hits: Vec<_> = tree.matches(&path("svc://echo")).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pattern.to_string(), "svc://echo");
    }

    #[test]
    fn test_no_match_is_empty() {
        let mut tree = RouteTree::new();
        tree.register(&path("svc://echo"), noop(), RouteOptions::default())
            .unwrap();

        let matches = tree.matches(&path("svc://unknown"));
        assert!(matches.is_empty());
    }

    #[test]
    fn test_param_extraction() {
        let mut tree = RouteTree::new();
        tree.register(&path("svc://orders/{id}/items"), noop(), RouteOptions::default())
            .unwrap();

        let hit = tree.matches(&path("svc://orders/42/items")).next().unwrap();
        assert_eq!(hit.params.get("id"), Some("42"));
    }

    #[test]
    fn test_wildcard_single_segment() {
        let mut tree = RouteTree::new();
        tree.register(&path("svc://a/*/c"), noop(), RouteOptions::default())
            .unwrap();

        assert_eq!(tree.matches(&path("svc://a/b/c")).len(), 1);
        assert!(tree.matches(&path("svc://a/b/b/c")).is_empty());
    }

    #[test]
    fn test_tail_wildcard() {
        let mut tree = RouteTree::new();
        tree.register(&path("svc://a/**"), noop(), RouteOptions::default())
            .unwrap();

        assert_eq!(tree.matches(&path("svc://a/b")).len(), 1);
        assert_eq!(tree.matches(&path("svc://a/b/c/d")).len(), 1);
        // Tail also covers the anchor itself.
        assert_eq!(tree.matches(&path("svc://a")).len(), 1);
        assert!(tree.matches(&path("svc://x/b")).is_empty());
    }

    #[test]
    fn test_longest_literal_wins() {
        let mut tree = RouteTree::new();
        tree.register(&path("svc://orders/{id}"), noop(), RouteOptions::default())
            .unwrap();
        tree.register(&path("svc://orders/special"), noop(), RouteOptions::default())
            .unwrap();

        let hits: Vec<_> = tree.matches(&path("svc://orders/special")).collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].pattern.to_string(), "svc://orders/special");
        assert_eq!(hits[1].pattern.to_string(), "svc://orders/{id}");
    }

    #[test]
    fn test_priority_breaks_specificity_ties() {
        let mut tree = RouteTree::new();
        tree.register(
            &path("svc://a/{x}"),
            noop(),
            RouteOptions::with_priority(1),
        )
        .unwrap();
        tree.register(
            &path("svc://a/{y}"),
            noop(),
            RouteOptions::with_priority(5),
        )
        .unwrap();

        let hits: Vec<_> = tree.matches(&path("svc://a/b")).collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].priority, 5);
        assert_eq!(hits[0].pattern.to_string(), "svc://a/{y}");
    }

    #[test]
    fn test_duplicate_pattern_rejected() {
        let mut tree = RouteTree::new();
        tree.register(&path("svc://echo"), noop(), RouteOptions::default())
            .unwrap();

        let err = tree
            .register(&path("svc://echo"), noop(), RouteOptions::default())
            .unwrap_err();
        assert!(matches!(err, RouteError::DuplicatePattern(_)));
    }

    #[test]
    fn test_overwrite_allowed() {
        let mut tree = RouteTree::new();
        tree.register(&path("svc://echo"), noop(), RouteOptions::default())
            .unwrap();

        let options = RouteOptions {
            overwrite: true,
            priority: 9,
            ..Default::default()
        };
        tree.register(&path("svc://echo"), noop(), options).unwrap();

        assert_eq!(tree.len(), 1);
        let hit = tree.matches(&path("svc://echo")).next().unwrap();
        assert_eq!(hit.priority, 9);
    }

    #[test]
    fn test_match_stable_under_unrelated_registration() {
        let mut tree = RouteTree::new();
        tree.register(&path("svc://orders/{id}"), noop(), RouteOptions::default())
            .unwrap();

        let before: Vec<String> = tree
            .matches(&path("svc://orders/42"))
            .map(|m| m.pattern.to_string())
            .collect();

        tree.register(&path("svc://invoices/{id}"), noop(), RouteOptions::default())
            .unwrap();

        let after: Vec<String> = tree
            .matches(&path("svc://orders/42"))
            .map(|m| m.pattern.to_string())
            .collect();

        assert_eq!(before, after);
    }

    #[test]
    fn test_distinct_param_names_both_match() {
        let mut tree = RouteTree::new();
        tree.register(&path("svc://u/{id}"), noop(), RouteOptions::default())
            .unwrap();
        tree.register(&path("svc://u/{name}"), noop(), RouteOptions::default())
            .unwrap();

        let hits: Vec<_> = tree.matches(&path("svc://u/alice")).collect();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_root_entry() {
        let mut tree = RouteTree::new();
        tree.register(&path("svc://"), noop(), RouteOptions::default())
            .unwrap();
        assert_eq!(tree.matches(&path("svc://")).len(), 1);
        assert!(tree.matches(&path("svc://x")).is_empty());
    }
}
