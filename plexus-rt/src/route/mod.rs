//! Route trees: path-pattern matching onto handlers.

pub mod handler;
pub mod tree;

pub use handler::{
    route_fn, HandlerContext, HandlerError, HandlerOutcome, RouteHandler, RouteParams,
};
pub use tree::{RouteError, RouteMatch, RouteMatches, RouteOptions, RouteTree};
