//! Lock-free subsystem registry.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use dashmap::DashMap;

// Layer 3: Internal module imports
use super::errors::SystemError;
use crate::subsystem::Subsystem;

/// Name → subsystem lookup table.
///
/// Read-mostly: writes happen only during registration and disposal, so a
/// concurrent map gives lock-free resolution on the routing hot path.
#[derive(Debug, Default)]
pub struct SubsystemRegistry {
    map: DashMap<String, Subsystem>,
}

impl SubsystemRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subsystem under its name.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::DuplicateSubsystem`] when the name is taken.
    pub fn insert(&self, subsystem: Subsystem) -> Result<(), SystemError> {
        let name = subsystem.name().to_string();
        if self.map.contains_key(&name) {
            return Err(SystemError::DuplicateSubsystem(name));
        }
        self.map.insert(name, subsystem);
        Ok(())
    }

    /// Resolve a subsystem by name.
    pub fn get(&self, name: &str) -> Option<Subsystem> {
        self.map.get(name).map(|entry| entry.clone())
    }

    /// Remove a subsystem, returning it.
    pub fn remove(&self, name: &str) -> Option<Subsystem> {
        self.map.remove(name).map(|(_, subsystem)| subsystem)
    }

    /// True when the name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Registered names, sorted for deterministic iteration.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.map.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshot of every registered subsystem, name-sorted.
    pub fn all(&self) -> Vec<Subsystem> {
        let mut subsystems: Vec<Subsystem> =
            self.map.iter().map(|e| e.value().clone()).collect();
        subsystems.sort_by(|a, b| a.name().cmp(b.name()));
        subsystems
    }

    /// Number of registered subsystems.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
