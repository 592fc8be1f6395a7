//! Error manager: pluggable classification over a bounded ring store.

// Layer 1: Standard library imports
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

// Layer 3: Internal module imports
use super::record::{ErrorRecord, FaultKind, Severity};

/// Raw failure handed to classification.
///
/// Producers fill in what they know; classifiers turn it into an
/// [`ErrorRecord`].
#[derive(Debug, Clone)]
pub struct RawFault {
    /// Suggested kind from the producing component, if any.
    pub kind_hint: Option<FaultKind>,
    /// Subsystem the failure is attributed to.
    pub subsystem: Option<String>,
    /// Description of the failure.
    pub message: String,
    /// Free-form context.
    pub metadata: HashMap<String, Value>,
}

impl RawFault {
    /// Create a raw fault with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind_hint: None,
            subsystem: None,
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    /// Suggest a fault kind.
    pub fn with_kind(mut self, kind: FaultKind) -> Self {
        self.kind_hint = Some(kind);
        self
    }

    /// Attribute to a subsystem.
    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Pluggable fault classifier.
///
/// Classifiers run in registration order; the first one that returns
/// `Some` wins. A built-in fallback maps the kind hint (or `Internal`)
/// with conventional severity, so classification never fails.
pub trait ErrorClassifier: Send + Sync {
    /// Attempt to classify the fault. Return `None` to pass.
    fn classify(&self, raw: &RawFault) -> Option<ErrorRecord>;
}

/// Filter for [`ErrorManager::query_recent`].
#[derive(Debug, Clone, Default)]
pub struct ErrorQuery {
    /// Restrict to one fault kind.
    pub kind: Option<FaultKind>,
    /// Restrict to one subsystem.
    pub subsystem: Option<String>,
    /// Maximum records returned (newest first). 0 means no limit.
    pub limit: usize,
}

/// Aggregated error counts.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    /// Record counts keyed by fault kind.
    pub by_kind: HashMap<String, usize>,
    /// Record counts keyed by subsystem (`"-"` for unattributed).
    pub by_subsystem: HashMap<String, usize>,
}

/// Classifies failures and stores recent records in a bounded ring.
pub struct ErrorManager {
    classifiers: RwLock<Vec<Arc<dyn ErrorClassifier>>>,
    store: Mutex<VecDeque<ErrorRecord>>,
    capacity: usize,
}

impl ErrorManager {
    /// Create a manager whose ring holds at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            classifiers: RwLock::new(Vec::new()),
            store: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    /// Append a classifier. Runs after all previously added classifiers.
    pub fn add_classifier(&self, classifier: Arc<dyn ErrorClassifier>) {
        self.classifiers.write().push(classifier);
    }

    /// Classify a raw fault and store the resulting record.
    pub fn record(&self, raw: RawFault) -> ErrorRecord {
        let record = self.classify(&raw);
        debug!(
            kind = %record.kind,
            severity = %record.severity,
            subsystem = record.subsystem.as_deref().unwrap_or("-"),
            "error recorded: {}",
            record.message
        );
        self.push(record.clone());
        record
    }

    /// Store an already-built record.
    pub fn record_prepared(&self, record: ErrorRecord) {
        self.push(record);
    }

    fn classify(&self, raw: &RawFault) -> ErrorRecord {
        for classifier in self.classifiers.read().iter() {
            if let Some(record) = classifier.classify(raw) {
                return record;
            }
        }
        // Fallback: honor the hint, default to Internal.
        let kind = raw.kind_hint.unwrap_or(FaultKind::Internal);
        let mut record = ErrorRecord::new(kind, raw.message.clone());
        record.subsystem = raw.subsystem.clone();
        record.metadata = raw.metadata.clone();
        record
    }

    fn push(&self, record: ErrorRecord) {
        let mut store = self.store.lock();
        if store.len() == self.capacity {
            store.pop_front();
        }
        store.push_back(record);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// True when no records are stored.
    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Query stored records, newest first.
    pub fn query_recent(&self, query: &ErrorQuery) -> Vec<ErrorRecord> {
        let store = self.store.lock();
        let mut out: Vec<ErrorRecord> = store
            .iter()
            .rev()
            .filter(|r| query.kind.map_or(true, |k| r.kind == k))
            .filter(|r| {
                query
                    .subsystem
                    .as_deref()
                    .map_or(true, |s| r.subsystem.as_deref() == Some(s))
            })
            .cloned()
            .collect();
        if query.limit > 0 {
            out.truncate(query.limit);
        }
        out
    }

    /// Aggregate counts over the most recent `limit` records (0 = all).
    pub fn summary(&self, limit: usize) -> ErrorSummary {
        let store = self.store.lock();
        let iter: Box<dyn Iterator<Item = &ErrorRecord>> = if limit > 0 {
            Box::new(store.iter().rev().take(limit))
        } else {
            Box::new(store.iter())
        };

        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut by_subsystem: HashMap<String, usize> = HashMap::new();
        for record in iter {
            *by_kind.entry(record.kind.to_string()).or_default() += 1;
            let subsystem = record.subsystem.clone().unwrap_or_else(|| "-".to_string());
            *by_subsystem.entry(subsystem).or_default() += 1;
        }
        ErrorSummary {
            by_kind,
            by_subsystem,
        }
    }
}

impl std::fmt::Debug for ErrorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorManager")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
