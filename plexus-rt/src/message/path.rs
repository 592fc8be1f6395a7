//! Path-based addressing.
//!
//! Canonical form is `<subsystem>://<segment>/<segment>...` where the
//! subsystem part identifies the target mailbox and the remaining segments
//! select a route inside it. Patterns registered on a route tree may use
//! `{name}` placeholders, the single-segment wildcard `*`, and the tail
//! wildcard `**` (final segment only).

// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::str::FromStr;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Subsystem names that cannot be claimed by application subsystems.
pub const RESERVED_SUBSYSTEMS: [&str; 5] = ["kernel", "query", "channel", "request", "event"];

/// One path segment after the subsystem part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// Plain literal segment.
    Literal(String),
    /// Named placeholder `{name}`; matches any single segment and binds it.
    Param(String),
    /// `*`; matches any single segment without binding.
    Wildcard,
    /// `**`; matches any remaining tail. Only valid as the final segment.
    TailWildcard,
}

impl Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "{s}"),
            Self::Param(name) => write!(f, "{{{name}}}"),
            Self::Wildcard => write!(f, "*"),
            Self::TailWildcard => write!(f, "**"),
        }
    }
}

/// Errors produced while parsing a message path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path string was empty.
    #[error("path is empty")]
    Empty,

    /// The `://` separator was missing.
    #[error("path {0:?} has no '://' separator")]
    MissingSeparator(String),

    /// The subsystem part was empty or malformed.
    ///
    /// Subsystem names must match `[a-z][a-z0-9-]*`.
    #[error("invalid subsystem name {0:?}")]
    InvalidSubsystem(String),

    /// A segment between separators was empty.
    #[error("empty segment in path {0:?}")]
    EmptySegment(String),

    /// A `{name}` placeholder had an empty or malformed name.
    #[error("invalid parameter segment {0:?}")]
    InvalidParam(String),

    /// `**` appeared somewhere other than the final segment.
    #[error("tail wildcard '**' must be the final segment in {0:?}")]
    TailNotLast(String),
}

/// A parsed, canonical message path.
///
/// Parsing and formatting round-trip: `parse(format(p)) == p`.
///
/// # Example
/// ```rust
/// use plexus_rt::message::MessagePath;
///
/// let path: MessagePath = "svc://orders/{id}/items".parse().unwrap();
/// assert_eq!(path.subsystem(), "svc");
/// assert_eq!(path.to_string(), "svc://orders/{id}/items");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessagePath {
    subsystem: String,
    segments: Vec<Segment>,
}

fn valid_subsystem(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl MessagePath {
    /// Parse a path string into its canonical form.
    ///
    /// # Errors
    ///
    /// Returns a [`PathError`] when the subsystem part is missing or
    /// malformed, a segment is empty, or `**` is not the final segment.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }

        let (subsystem, rest) = raw
            .split_once("://")
            .ok_or_else(|| PathError::MissingSeparator(raw.to_string()))?;

        if !valid_subsystem(subsystem) {
            return Err(PathError::InvalidSubsystem(subsystem.to_string()));
        }

        let mut segments = Vec::new();
        if !rest.is_empty() {
            for part in rest.split('/') {
                if part.is_empty() {
                    return Err(PathError::EmptySegment(raw.to_string()));
                }
                let segment = match part {
                    "*" => Segment::Wildcard,
                    "**" => Segment::TailWildcard,
                    _ if part.starts_with('{') && part.ends_with('}') => {
                        let name = &part[1..part.len() - 1];
                        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                            return Err(PathError::InvalidParam(part.to_string()));
                        }
                        Segment::Param(name.to_string())
                    }
                    _ => Segment::Literal(part.to_string()),
                };
                segments.push(segment);
            }
        }

        if let Some(pos) = segments.iter().position(|s| *s == Segment::TailWildcard) {
            if pos != segments.len() - 1 {
                return Err(PathError::TailNotLast(raw.to_string()));
            }
        }

        Ok(Self {
            subsystem: subsystem.to_string(),
            segments,
        })
    }

    /// Target subsystem name.
    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    /// Path segments after the subsystem part.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// First segment after the subsystem part, when it is a literal.
    ///
    /// Query delegation keys off this value.
    pub fn head(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::Literal(s)) => Some(s),
            _ => None,
        }
    }

    /// True when the path contains no wildcards or placeholders.
    ///
    /// Only concrete paths address messages; patterns belong in route
    /// registrations.
    pub fn is_concrete(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// True when the subsystem name is reserved for kernel use.
    pub fn is_reserved(&self) -> bool {
        RESERVED_SUBSYSTEMS.contains(&self.subsystem.as_str())
    }

    /// Rebuild this path under a different subsystem, keeping the segments.
    ///
    /// Used when fanning a channel reply out to each participant.
    pub fn with_subsystem(&self, subsystem: &str) -> Result<Self, PathError> {
        if !valid_subsystem(subsystem) {
            return Err(PathError::InvalidSubsystem(subsystem.to_string()));
        }
        Ok(Self {
            subsystem: subsystem.to_string(),
            segments: self.segments.clone(),
        })
    }
}

impl Display for MessagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.subsystem)?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for MessagePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
