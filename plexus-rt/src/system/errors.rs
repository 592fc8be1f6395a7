//! System-level error types.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::access::AccessError;
use crate::kernel::KernelError;
use crate::subsystem::SubsystemError;

/// Errors surfaced by [`crate::system::MessageSystem`].
#[derive(Debug, Error)]
pub enum SystemError {
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The subsystem name is reserved for kernel use.
    #[error("subsystem name is reserved: {0}")]
    ReservedName(String),

    /// A subsystem with the name is already registered.
    #[error("subsystem already registered: {0}")]
    DuplicateSubsystem(String),

    /// The subsystem must be built before registration.
    #[error("subsystem is not built: {0}")]
    SubsystemNotBuilt(String),

    /// No subsystem with the name is registered.
    #[error("unknown subsystem: {0}")]
    UnknownSubsystem(String),

    /// The scheduler strategy name is not registered.
    #[error("unknown scheduler strategy: {0}")]
    UnknownStrategy(String),

    /// The operation requires `bootstrap()` first.
    #[error("system is not bootstrapped")]
    NotBootstrapped,

    /// `bootstrap()` was already called.
    #[error("system is already bootstrapped")]
    AlreadyBootstrapped,

    /// The system is shutting down or stopped.
    #[error("system is shutting down")]
    ShuttingDown,

    /// Subsystem composition failed.
    #[error(transparent)]
    Subsystem(#[from] SubsystemError),

    /// Access-control failure.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Kernel send-path failure.
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            SystemError::ReservedName("kernel".to_string()).to_string(),
            "subsystem name is reserved: kernel"
        );
        assert!(SystemError::NotBootstrapped.to_string().contains("bootstrapped"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SystemError>();
    }
}
