//! Error record types.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// Layer 3: Internal module imports
// (none)

/// Classified failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// No route matched the message path.
    Unroutable,
    /// Retry budget exhausted.
    MaxRetries,
    /// A pending response deadline expired.
    Timeout,
    /// The kernel access check denied delivery.
    AuthFailed,
    /// Handler-declared input validation failure.
    Validation,
    /// Handler raised an unclassified error.
    Internal,
    /// Failure attributed to an external collaborator.
    External,
    /// Plain application-level failure.
    Simple,
    /// A message was evicted from a full mailbox under `EvictOldest`.
    QueueEvicted,
}

impl Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unroutable => "unroutable",
            Self::MaxRetries => "maxretries",
            Self::Timeout => "timeout",
            Self::AuthFailed => "auth_failed",
            Self::Validation => "validation",
            Self::Internal => "internal",
            Self::External => "external",
            Self::Simple => "simple",
            Self::QueueEvicted => "queue_evicted",
        };
        write!(f, "{s}")
    }
}

/// Severity attached to an error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Degraded but expected condition.
    Warn,
    /// Operation failed.
    Error,
    /// System-level failure.
    Critical,
}

impl Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl Severity {
    /// Conventional severity for a fault kind, used when no classifier
    /// overrides it.
    pub fn for_kind(kind: FaultKind) -> Self {
        match kind {
            FaultKind::Unroutable => Self::Warn,
            FaultKind::MaxRetries => Self::Error,
            FaultKind::Timeout => Self::Warn,
            FaultKind::AuthFailed => Self::Warn,
            FaultKind::Validation => Self::Warn,
            FaultKind::Internal => Self::Error,
            FaultKind::External => Self::Error,
            FaultKind::Simple => Self::Info,
            FaultKind::QueueEvicted => Self::Warn,
        }
    }
}

/// One classified error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Unique record id.
    pub id: Uuid,
    /// Classified kind.
    pub kind: FaultKind,
    /// Severity.
    pub severity: Severity,
    /// Subsystem the failure is attributed to, when known.
    pub subsystem: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Classification time.
    pub timestamp: DateTime<Utc>,
    /// Free-form context (message ids, paths, reasons).
    pub metadata: HashMap<String, Value>,
}

impl ErrorRecord {
    /// Create a record with the conventional severity for its kind.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity: Severity::for_kind(kind),
            subsystem: None,
            message: message.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Attribute the record to a subsystem.
    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    /// Override the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_severity_mapping() {
        assert_eq!(Severity::for_kind(FaultKind::Unroutable), Severity::Warn);
        assert_eq!(Severity::for_kind(FaultKind::Internal), Severity::Error);
        assert_eq!(Severity::for_kind(FaultKind::Simple), Severity::Info);
    }

    #[test]
    fn test_record_builder() {
        let record = ErrorRecord::new(FaultKind::Unroutable, "no route")
            .with_subsystem("svc")
            .with_metadata("path", json!("svc://nope"));

        assert_eq!(record.kind, FaultKind::Unroutable);
        assert_eq!(record.severity, Severity::Warn);
        assert_eq!(record.subsystem.as_deref(), Some("svc"));
        assert_eq!(record.metadata["path"], "svc://nope");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FaultKind::AuthFailed.to_string(), "auth_failed");
        assert_eq!(FaultKind::MaxRetries.to_string(), "maxretries");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warn);
        assert!(Severity::Warn > Severity::Info);
    }
}
