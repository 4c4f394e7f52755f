//! # weft-router
//!
//! Route-keyed dispatch over the weft fabric. A [`MessageRouter`] owns one
//! request/reply end point and a [`RouteMessageHandler`]; outbound messages
//! are matched against a route hierarchy and either published to every
//! registered end point or sent point-to-point to the first one that handles
//! them. Inbound routed messages are decoded and handed to the handler, whose
//! result travels back as the reply.

mod error;
mod handler;
mod router;

pub use error::RouterError;
pub use handler::{RouteMessageHandler, RouteResult};
pub use router::MessageRouter;
