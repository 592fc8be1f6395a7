//! Principal arena and public-key records.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use super::rws::AccessError;
use crate::util::PrincipalId;

/// Principal kinds forming the ownership forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrincipalKind {
    /// The root principal; exactly one per system.
    Kernel,
    /// Application subsystem identity owned directly by the kernel.
    TopLevel,
    /// Kernel-hosted service or other owned resource.
    Resource,
    /// External collaborator granted scoped access.
    Friend,
}

/// Opaque public key material.
///
/// Keys identify principals; nothing in the core verifies signatures, so
/// the material is random bytes minted with the principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Private half of a kernel key pair. Never leaves the arena.
#[derive(Clone, Copy)]
pub(crate) struct PrivateKey([u8; 32]);

impl PrivateKey {
    fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(..)")
    }
}

/// Public-Key Record: the identity handle used throughout the kernel.
///
/// A PKR is both an opaque identity and a lookup key into the principal
/// arena. Equality and hashing consider only the principal id, so a PKR
/// compares equal to any other handle for the same principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    id: PrincipalId,
    public_key: PublicKey,
}

impl PublicKeyRecord {
    /// Principal id this record identifies.
    pub fn id(&self) -> PrincipalId {
        self.id
    }

    /// The principal's public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

impl PartialEq for PublicKeyRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PublicKeyRecord {}

impl Hash for PublicKeyRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for PublicKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkr:{}", self.id)
    }
}

/// One principal in the arena.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Arena id.
    pub id: PrincipalId,
    /// Kind in the ownership forest.
    pub kind: PrincipalKind,
    /// Public key material.
    pub public_key: PublicKey,
    /// Private key; only the kernel principal holds one.
    pub(crate) private_key: Option<PrivateKey>,
    /// Owning principal id; `None` only for the kernel root.
    pub owner: Option<PrincipalId>,
    /// Display name. Subsystem identities use the subsystem name.
    pub name: String,
    /// Free-form metadata.
    pub metadata: HashMap<String, Value>,
    /// Optional role label.
    pub role: Option<String>,
}

impl Principal {
    /// Handle for this principal.
    pub fn pkr(&self) -> PublicKeyRecord {
        PublicKeyRecord {
            id: self.id,
            public_key: self.public_key,
        }
    }
}

/// Arena of principals rooted at the kernel principal.
///
/// Ownership links are ids, never shared pointers, so the forest cannot
/// form reference cycles.
///
/// # Example
/// ```rust
/// use plexus_rt::access::{PrincipalKind, PrincipalRegistry};
///
/// let registry = PrincipalRegistry::new();
/// let kernel = registry.kernel_pkr();
///
/// let svc = registry
///     .mint(PrincipalKind::TopLevel, "svc", Some(&kernel))
///     .unwrap();
/// assert_ne!(svc, kernel);
/// ```
#[derive(Debug)]
pub struct PrincipalRegistry {
    arena: DashMap<PrincipalId, Principal>,
    kernel: PublicKeyRecord,
}

impl PrincipalRegistry {
    /// Create the arena and mint the kernel root principal.
    pub fn new() -> Self {
        let id = PrincipalId::new();
        let kernel = Principal {
            id,
            kind: PrincipalKind::Kernel,
            public_key: PublicKey::generate(),
            private_key: Some(PrivateKey::generate()),
            owner: None,
            name: "kernel".to_string(),
            metadata: HashMap::new(),
            role: None,
        };
        let pkr = kernel.pkr();
        let arena = DashMap::new();
        arena.insert(id, kernel);
        Self { arena, kernel: pkr }
    }

    /// Handle for the kernel root principal.
    pub fn kernel_pkr(&self) -> PublicKeyRecord {
        self.kernel.clone()
    }

    /// Mint a new principal.
    ///
    /// Non-kernel principals carry no private key. The owner defaults to
    /// the kernel when omitted.
    ///
    /// # Errors
    ///
    /// Rejects a second kernel principal and unknown owners.
    pub fn mint(
        &self,
        kind: PrincipalKind,
        name: impl Into<String>,
        owner: Option<&PublicKeyRecord>,
    ) -> Result<PublicKeyRecord, AccessError> {
        if kind == PrincipalKind::Kernel {
            return Err(AccessError::KernelExists);
        }
        let owner_id = match owner {
            Some(pkr) => {
                if !self.arena.contains_key(&pkr.id()) {
                    return Err(AccessError::UnknownPrincipal(pkr.id()));
                }
                pkr.id()
            }
            None => self.kernel.id(),
        };

        let principal = Principal {
            id: PrincipalId::new(),
            kind,
            public_key: PublicKey::generate(),
            private_key: None,
            owner: Some(owner_id),
            name: name.into(),
            metadata: HashMap::new(),
            role: None,
        };
        let pkr = principal.pkr();
        self.arena.insert(principal.id, principal);
        Ok(pkr)
    }

    /// Look up a principal by id.
    pub fn get(&self, id: &PrincipalId) -> Option<Principal> {
        self.arena.get(id).map(|p| p.clone())
    }

    /// Handle for a principal by id.
    pub fn pkr_of(&self, id: &PrincipalId) -> Option<PublicKeyRecord> {
        self.arena.get(id).map(|p| p.pkr())
    }

    /// First principal carrying the given name.
    pub fn find_by_name(&self, name: &str) -> Option<Principal> {
        self.arena
            .iter()
            .find(|entry| entry.value().name == name)
            .map(|entry| entry.value().clone())
    }

    /// Owner id of a principal.
    pub fn owner_of(&self, id: &PrincipalId) -> Option<PrincipalId> {
        self.arena.get(id).and_then(|p| p.owner)
    }

    /// Number of principals in the arena.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Always false: the kernel principal exists from construction.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

impl Default for PrincipalRegistry {
    fn default() -> Self {
        Self::new()
    }
}
