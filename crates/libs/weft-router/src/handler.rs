use async_trait::async_trait;
use weft_wire::{Message, Route};

use crate::RouterError;

/// Outcome of handling one routed message.
#[derive(Debug)]
pub struct RouteResult {
    /// Reply payload; ignored by peers when `handled` is false. A handled
    /// result may be empty: the router pads it to one empty frame on the
    /// wire so it stays distinguishable from the unhandled acknowledgement.
    pub response: Message,
    /// Whether this end point took the message. Point-to-point dispatch
    /// stops at the first handled result.
    pub handled: bool,
}

impl RouteResult {
    pub fn handled(response: Message) -> Self {
        Self { response, handled: true }
    }

    pub fn unhandled() -> Self {
        Self { response: Message::new(), handled: false }
    }
}

/// The serialised-message handler a router dispatches into.
///
/// Implementations typically look the route up in a registry of typed
/// handlers, decode the payload, and encode the dispatch result back into
/// the response message.
#[async_trait]
pub trait RouteMessageHandler: Send + Sync + 'static {
    /// Handles a message for `route`. `publish` mirrors the sender's
    /// dispatch mode; `local_dispatch` is true when the message never left
    /// this process.
    async fn handle(
        &self,
        route: &Route,
        message: Message,
        publish: bool,
        local_dispatch: bool,
    ) -> Result<RouteResult, RouterError>;
}
