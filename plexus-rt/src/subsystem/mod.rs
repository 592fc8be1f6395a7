//! Subsystems: mailbox + route tree + processor + statistics + identity.

pub mod base;
pub mod builder;
pub mod processor;
pub mod stats;

pub use base::{
    listener_fn, AcceptOutcome, ListenerStage, MessageListener, SliceReport, Subsystem,
    SubsystemError,
};
pub use builder::{CapabilityDescriptor, SubsystemBuilder};
pub use stats::{StatsSnapshot, SubsystemStats};
