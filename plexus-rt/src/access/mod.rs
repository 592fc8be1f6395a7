//! Identity and access control.
//!
//! Principals live in an arena owned by the kernel; [`PublicKeyRecord`]
//! handles act as identities everywhere else. Delivery authorization is an
//! owner-rooted reader/writer set per target subsystem.

pub mod principal;
pub mod rws;

pub use principal::{
    Principal, PrincipalKind, PrincipalRegistry, PublicKey, PublicKeyRecord,
};
pub use rws::{AccessError, AccessMode, AccessTable, ReaderWriterSet};
