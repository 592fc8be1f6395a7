//! Request/response correlation with bounded-time guarantees.

pub mod manager;

pub use manager::{PendingResponse, ReplyOptions, ResponseManager};
