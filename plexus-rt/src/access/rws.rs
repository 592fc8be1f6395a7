//! Reader/writer sets and the kernel access check.

// Layer 1: Standard library imports
use std::collections::HashSet;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

// Layer 3: Internal module imports
use super::principal::PublicKeyRecord;
use crate::util::PrincipalId;

/// Access-control errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// The arena already holds the kernel root principal.
    #[error("kernel principal already exists")]
    KernelExists,

    /// The referenced principal is not in the arena.
    #[error("unknown principal: {0}")]
    UnknownPrincipal(PrincipalId),

    /// No reader/writer set exists for the named owner.
    #[error("no reader/writer set for owner: {0}")]
    UnknownOwner(PrincipalId),
}

/// Delivery mode being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Observe state; satisfied by reader or writer membership.
    Read,
    /// Deliver or mutate; requires writer membership.
    Write,
}

/// Per-owner ACL. Writers imply readers; the kernel is an implicit member
/// of every set.
#[derive(Debug, Clone)]
pub struct ReaderWriterSet {
    /// The owning principal.
    pub owner: PublicKeyRecord,
    /// Principals granted read access.
    pub readers: HashSet<PrincipalId>,
    /// Principals granted write access.
    pub writers: HashSet<PrincipalId>,
}

impl ReaderWriterSet {
    /// Empty set for an owner.
    pub fn new(owner: PublicKeyRecord) -> Self {
        Self {
            owner,
            readers: HashSet::new(),
            writers: HashSet::new(),
        }
    }

    /// Writer membership.
    pub fn is_writer(&self, id: &PrincipalId) -> bool {
        self.writers.contains(id)
    }

    /// Reader membership; writers imply readers.
    pub fn is_reader(&self, id: &PrincipalId) -> bool {
        self.readers.contains(id) || self.writers.contains(id)
    }
}

/// Kernel-owned table of reader/writer sets, keyed by owner principal.
///
/// The check runs before enqueue in the kernel send path and is the only
/// producer of `auth_failed`.
///
/// # Example
/// ```rust
/// use plexus_rt::access::{AccessMode, AccessTable, PrincipalKind, PrincipalRegistry};
///
/// let principals = PrincipalRegistry::new();
/// let table = AccessTable::new(principals.kernel_pkr());
///
/// let svc = principals.mint(PrincipalKind::TopLevel, "svc", None).unwrap();
/// let caller = principals.mint(PrincipalKind::Friend, "caller", None).unwrap();
/// table.ensure_owner(&svc);
///
/// assert!(!table.can_access(&caller, &svc, AccessMode::Write));
/// table.grant(&svc, &caller, AccessMode::Write).unwrap();
/// assert!(table.can_access(&caller, &svc, AccessMode::Write));
/// ```
#[derive(Debug)]
pub struct AccessTable {
    rws_by_owner: DashMap<PrincipalId, ReaderWriterSet>,
    kernel: PublicKeyRecord,
}

impl AccessTable {
    /// Create an empty table rooted at the kernel principal.
    pub fn new(kernel: PublicKeyRecord) -> Self {
        Self {
            rws_by_owner: DashMap::new(),
            kernel,
        }
    }

    /// Create the owner's set when absent.
    pub fn ensure_owner(&self, owner: &PublicKeyRecord) {
        self.rws_by_owner
            .entry(owner.id())
            .or_insert_with(|| ReaderWriterSet::new(owner.clone()));
    }

    /// Remove the owner's set entirely.
    pub fn remove_owner(&self, owner: &PublicKeyRecord) {
        self.rws_by_owner.remove(&owner.id());
    }

    /// Grant `mode` on `owner` to `grantee`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::UnknownOwner`] when no set exists for the
    /// owner.
    pub fn grant(
        &self,
        owner: &PublicKeyRecord,
        grantee: &PublicKeyRecord,
        mode: AccessMode,
    ) -> Result<(), AccessError> {
        let mut rws = self
            .rws_by_owner
            .get_mut(&owner.id())
            .ok_or(AccessError::UnknownOwner(owner.id()))?;
        match mode {
            AccessMode::Read => {
                rws.readers.insert(grantee.id());
            }
            AccessMode::Write => {
                rws.writers.insert(grantee.id());
            }
        }
        debug!(owner = %owner.id(), grantee = %grantee.id(), ?mode, "access granted");
        Ok(())
    }

    /// Revoke `mode` on `owner` from `grantee`.
    ///
    /// Revoking write does not touch an explicit read grant. Takes effect
    /// on the next check.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::UnknownOwner`] when no set exists for the
    /// owner.
    pub fn revoke(
        &self,
        owner: &PublicKeyRecord,
        grantee: &PublicKeyRecord,
        mode: AccessMode,
    ) -> Result<(), AccessError> {
        let mut rws = self
            .rws_by_owner
            .get_mut(&owner.id())
            .ok_or(AccessError::UnknownOwner(owner.id()))?;
        match mode {
            AccessMode::Read => {
                rws.readers.remove(&grantee.id());
            }
            AccessMode::Write => {
                rws.writers.remove(&grantee.id());
            }
        }
        debug!(owner = %owner.id(), grantee = %grantee.id(), ?mode, "access revoked");
        Ok(())
    }

    /// The access decision.
    ///
    /// Allows: the kernel itself, self-sends, writers for either mode, and
    /// readers for reads. Everything else is denied.
    pub fn can_access(
        &self,
        caller: &PublicKeyRecord,
        target: &PublicKeyRecord,
        mode: AccessMode,
    ) -> bool {
        if caller == &self.kernel {
            return true;
        }
        if caller == target {
            return true;
        }
        match self.rws_by_owner.get(&target.id()) {
            Some(rws) => match mode {
                AccessMode::Write => rws.is_writer(&caller.id()),
                AccessMode::Read => rws.is_reader(&caller.id()),
            },
            None => false,
        }
    }

    /// Snapshot of one owner's set.
    pub fn rws_of(&self, owner: &PublicKeyRecord) -> Option<ReaderWriterSet> {
        self.rws_by_owner.get(&owner.id()).map(|r| r.clone())
    }
}
