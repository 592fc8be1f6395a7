//! Top-level message system: configuration, registry, router, services.

pub mod config;
pub mod errors;
pub mod message_system;
pub mod registry;
pub mod router;
pub mod services;

pub use config::{KernelConfig, KernelConfigBuilder};
pub use errors::SystemError;
pub use message_system::MessageSystem;
pub use registry::SubsystemRegistry;
pub use router::{DeliveryMode, MessageRouter, RouteReceipt, RouterError, RouterStats};
pub use services::CoreServices;
