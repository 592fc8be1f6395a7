//! The kernel subsystem: access-checked sends and hosted services.

pub mod subsystem;

pub use subsystem::{KernelError, KernelSubsystem, SendOptions};
