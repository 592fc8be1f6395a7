//! Named multi-participant reply channels.

pub mod manager;

pub use manager::{Channel, ChannelError, ChannelManager};
