//! Subsystem construction with declarative capability validation.
//!
//! A subsystem's capabilities are explicit fields assembled here, not
//! attachments bolted on at runtime. The builder validates the capability
//! dependency graph (no cycles, no missing prerequisites) before the
//! composite is constructed; after `build()` the shape is frozen.

// Layer 1: Standard library imports
use std::collections::{HashMap, HashSet};

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use super::base::{Subsystem, SubsystemError};
use crate::mailbox::DropPolicy;
use crate::message::RESERVED_SUBSYSTEMS;

/// Default mailbox capacity when the builder does not override it.
pub const DEFAULT_SUBSYSTEM_CAPACITY: usize = 1024;

/// One capability a subsystem carries, with its prerequisites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    /// Capability name; unique per subsystem.
    pub name: String,
    /// Capabilities that must also be present.
    pub requires: Vec<String>,
}

impl CapabilityDescriptor {
    /// Descriptor with no prerequisites.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires: Vec::new(),
        }
    }

    /// Add prerequisites.
    pub fn requires(mut self, names: impl IntoIterator<Item = &'static str>) -> Self {
        self.requires
            .extend(names.into_iter().map(str::to_string));
        self
    }
}

/// The capabilities every subsystem carries.
pub(crate) fn standard_capabilities() -> Vec<CapabilityDescriptor> {
    vec![
        CapabilityDescriptor::new("identity"),
        CapabilityDescriptor::new("mailbox"),
        CapabilityDescriptor::new("statistics"),
        CapabilityDescriptor::new("routes"),
        CapabilityDescriptor::new("processor")
            .requires(["mailbox", "routes", "statistics", "identity"]),
    ]
}

/// Fluent builder for [`Subsystem`].
///
/// # Example
/// ```rust
/// use plexus_rt::subsystem::Subsystem;
///
/// let subsystem = Subsystem::builder("svc")
///     .with_capacity(64)
///     .with_weight(2.0)
///     .finish()
///     .unwrap();
/// assert_eq!(subsystem.name(), "svc");
/// ```
#[derive(Debug)]
pub struct SubsystemBuilder {
    name: String,
    capacity: usize,
    drop_policy: DropPolicy,
    synchronous: bool,
    weight: f64,
    priority: u8,
    capabilities: Vec<CapabilityDescriptor>,
}

impl SubsystemBuilder {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: DEFAULT_SUBSYSTEM_CAPACITY,
            drop_policy: DropPolicy::RejectNew,
            synchronous: false,
            weight: 1.0,
            priority: 0,
            capabilities: standard_capabilities(),
        }
    }

    /// Mailbox capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Mailbox overflow policy.
    pub fn with_drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Process messages inline on `accept()` instead of queueing.
    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Scheduling weight used by weighted and fair-share strategies.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = if weight > 0.0 { weight } else { 1.0 };
        self
    }

    /// Scheduling priority used by the priority strategy.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Declare an additional capability.
    pub fn with_capability(mut self, descriptor: CapabilityDescriptor) -> Self {
        self.capabilities.push(descriptor);
        self
    }

    /// Validate and construct the (unbuilt) subsystem.
    ///
    /// # Errors
    ///
    /// Rejects empty or reserved names, duplicate capability names,
    /// missing prerequisites, and dependency cycles.
    pub fn finish(self) -> Result<Subsystem, SubsystemError> {
        if RESERVED_SUBSYSTEMS.contains(&self.name.as_str()) {
            return Err(SubsystemError::ReservedName(self.name));
        }
        self.finish_reserved()
    }

    /// Construction path for kernel-owned subsystems that may claim
    /// reserved names.
    pub(crate) fn finish_reserved(self) -> Result<Subsystem, SubsystemError> {
        if self.name.is_empty() {
            return Err(SubsystemError::EmptyName);
        }

        let ordered = validate_capabilities(&self.capabilities)?;
        Ok(Subsystem::construct(
            self.name,
            self.capacity,
            self.drop_policy,
            self.synchronous,
            self.weight,
            self.priority,
            ordered,
        ))
    }
}

/// Topologically order capability descriptors.
///
/// Rejects duplicates, missing prerequisites, and cycles.
fn validate_capabilities(
    descriptors: &[CapabilityDescriptor],
) -> Result<Vec<CapabilityDescriptor>, SubsystemError> {
    let mut by_name: HashMap<&str, &CapabilityDescriptor> = HashMap::new();
    for descriptor in descriptors {
        if by_name.insert(&descriptor.name, descriptor).is_some() {
            return Err(SubsystemError::DuplicateCapability(
                descriptor.name.clone(),
            ));
        }
    }

    for descriptor in descriptors {
        for requirement in &descriptor.requires {
            if !by_name.contains_key(requirement.as_str()) {
                return Err(SubsystemError::MissingCapability {
                    name: descriptor.name.clone(),
                    requires: requirement.clone(),
                });
            }
        }
    }

    // Depth-first topological sort with cycle detection.
    let mut ordered = Vec::with_capacity(descriptors.len());
    let mut done: HashSet<&str> = HashSet::new();
    let mut in_progress: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a CapabilityDescriptor>,
        done: &mut HashSet<&'a str>,
        in_progress: &mut HashSet<&'a str>,
        ordered: &mut Vec<CapabilityDescriptor>,
    ) -> Result<(), SubsystemError> {
        if done.contains(name) {
            return Ok(());
        }
        if !in_progress.insert(name) {
            return Err(SubsystemError::CapabilityCycle(name.to_string()));
        }
        if let Some(descriptor) = by_name.get(name) {
            for requirement in &descriptor.requires {
                visit(requirement, by_name, done, in_progress, ordered)?;
            }
            ordered.push((*descriptor).clone());
        }
        in_progress.remove(name);
        done.insert(name);
        Ok(())
    }

    for descriptor in descriptors {
        visit(
            &descriptor.name,
            &by_name,
            &mut done,
            &mut in_progress,
            &mut ordered,
        )?;
    }

    Ok(ordered)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests are allowed to use unwrap for simplicity
mod tests {
    use super::*;

    #[test]
    fn test_standard_capabilities_validate() {
        let subsystem = Subsystem::builder("svc").finish().unwrap();
        assert!(subsystem.has_capability("mailbox"));
        assert!(subsystem.has_capability("processor"));
        assert!(!subsystem.has_capability("cache"));
    }

    #[test]
    fn test_reserved_names_rejected() {
        for name in RESERVED_SUBSYSTEMS {
            assert!(matches!(
                Subsystem::builder(name).finish(),
                Err(SubsystemError::ReservedName(_))
            ));
        }
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(
            Subsystem::builder("").finish(),
            Err(SubsystemError::EmptyName)
        ));
    }

    #[test]
    fn test_custom_capability_with_prerequisite() {
        let subsystem = Subsystem::builder("svc")
            .with_capability(CapabilityDescriptor::new("cache").requires(["mailbox"]))
            .finish()
            .unwrap();
        assert!(subsystem.has_capability("cache"));
    }

    #[test]
    fn test_missing_prerequisite_rejected() {
        let result = Subsystem::builder("svc")
            .with_capability(CapabilityDescriptor::new("cache").requires(["warp-drive"]))
            .finish();
        assert!(matches!(
            result,
            Err(SubsystemError::MissingCapability { .. })
        ));
    }

    #[test]
    fn test_duplicate_capability_rejected() {
        let result = Subsystem::builder("svc")
            .with_capability(CapabilityDescriptor::new("mailbox"))
            .finish();
        assert!(matches!(
            result,
            Err(SubsystemError::DuplicateCapability(_))
        ));
    }

    #[test]
    fn test_capability_cycle_rejected() {
        let result = Subsystem::builder("svc")
            .with_capability(CapabilityDescriptor::new("a").requires(["b"]))
            .with_capability(CapabilityDescriptor::new("b").requires(["a"]))
            .finish();
        assert!(matches!(result, Err(SubsystemError::CapabilityCycle(_))));
    }

    #[test]
    fn test_prerequisites_ordered_first() {
        let subsystem = Subsystem::builder("svc").finish().unwrap();
        let names: Vec<&str> = subsystem
            .capabilities()
            .iter()
            .map(|c| c.name.as_str())
            .collect();

        let mailbox = names.iter().position(|n| *n == "mailbox").unwrap();
        let processor = names.iter().position(|n| *n == "processor").unwrap();
        assert!(mailbox < processor);
    }

    #[test]
    fn test_nonpositive_weight_clamped() {
        let subsystem = Subsystem::builder("svc").with_weight(-3.0).finish().unwrap();
        assert_eq!(subsystem.weight(), 1.0);
    }
}
