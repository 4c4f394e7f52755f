//! The message router.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use weft_directory::{RouteManager, RouteRegistrationOptions};
use weft_fabric::{
    EndPointManager, EndPointMultiplexer, FabricError, IncomingRequest, RequestReplyEndPoint,
};
use weft_lifecycle::{Completion, DisposalGate};
use weft_wire::{EndPointAddress, Message, Route, RouteHierarchy, RouterFraming};

use crate::{RouteMessageHandler, RouteResult, RouterError};

struct RouterInner<M: EndPointMultiplexer> {
    endpoint: RequestReplyEndPoint<M>,
    handler: Arc<dyn RouteMessageHandler>,
    route_manager: Arc<RouteManager>,
    gate: DisposalGate,
    disposal: Completion<()>,
}

/// Routes messages between end points by route key.
///
/// Outbound, a message is matched against a route hierarchy from most
/// specific to least: point-to-point dispatch returns the first handled
/// response, publish fans out to every matching end point exactly once
/// across the hierarchy. Inbound, routed messages are decoded and handed to
/// the [`RouteMessageHandler`]; its result is the reply, with an empty
/// acknowledgement standing in for "not handled".
pub struct MessageRouter<M: EndPointMultiplexer> {
    inner: Arc<RouterInner<M>>,
}

impl<M: EndPointMultiplexer> Clone for MessageRouter<M> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<M: EndPointMultiplexer> MessageRouter<M> {
    /// Creates the router's logical end point on `manager` and starts it.
    pub async fn create(
        manager: &EndPointManager<M>,
        address: EndPointAddress,
        handler: Arc<dyn RouteMessageHandler>,
        route_manager: Arc<RouteManager>,
    ) -> Result<Self, RouterError> {
        let endpoint = manager.create_logical_end_point(address).await?;
        Ok(Self::start(RequestReplyEndPoint::start(endpoint), handler, route_manager))
    }

    /// Wraps an existing request/reply end point and starts the receive
    /// loop.
    pub fn start(
        endpoint: RequestReplyEndPoint<M>,
        handler: Arc<dyn RouteMessageHandler>,
        route_manager: Arc<RouteManager>,
    ) -> Self {
        let inner = Arc::new(RouterInner {
            endpoint,
            handler,
            route_manager,
            gate: DisposalGate::new(),
            disposal: Completion::new(),
        });
        tokio::spawn(run_receive_loop(inner.clone()));
        Self { inner }
    }

    pub fn address(&self) -> &EndPointAddress {
        self.inner.endpoint.address()
    }

    pub fn disposal(&self) -> Completion<()> {
        self.inner.disposal.clone()
    }

    /// Dispatches to one known end point.
    ///
    /// A local target is handed straight to the handler with
    /// `local_dispatch` set; a remote target gets the router framing and a
    /// request/reply round trip. The message and the response are trimmed to
    /// their visible frames.
    pub async fn route(
        &self,
        route: &Route,
        message: Message,
        publish: bool,
        end_point: &EndPointAddress,
        cancellation: &CancellationToken,
    ) -> Result<RouteResult, RouterError> {
        let _guard = self.inner.gate.guard()?;
        dispatch_one(&self.inner, route, message, publish, end_point, cancellation).await
    }

    /// Dispatches across a route hierarchy.
    ///
    /// Point-to-point (`publish` false) walks each level's registrations in
    /// reverse registration order and returns the first handled response.
    /// Publish invokes every matching end point concurrently, at most once
    /// across all levels, and returns the handled responses in no particular
    /// order. `PUBLISH_ONLY` registrations are skipped for point-to-point;
    /// `LOCAL_DISPATCH_ONLY` registrations of other end points are always
    /// skipped.
    pub async fn route_hierarchy(
        &self,
        hierarchy: &RouteHierarchy,
        message: &Message,
        publish: bool,
        cancellation: &CancellationToken,
    ) -> Result<Vec<Message>, RouterError> {
        let _guard = self.inner.gate.guard()?;
        if publish {
            publish_all(&self.inner, hierarchy, message, cancellation).await
        } else {
            send_first_match(&self.inner, hierarchy, message, cancellation).await
        }
    }

    /// Registers this router's end point for `route`.
    pub async fn register_route(
        &self,
        route: &Route,
        options: RouteRegistrationOptions,
    ) -> Result<(), RouterError> {
        let _guard = self.inner.gate.guard()?;
        self.inner
            .route_manager
            .add_route(self.inner.endpoint.address(), route, options)
            .await
            .map_err(Into::into)
    }

    pub async fn unregister_route(&self, route: &Route) -> Result<(), RouterError> {
        let _guard = self.inner.gate.guard()?;
        self.inner
            .route_manager
            .remove_route(self.inner.endpoint.address(), route)
            .await
            .map_err(Into::into)
    }

    /// Withdraws this end point's registrations; persistent ones only when
    /// `remove_persistent`.
    pub async fn unregister_routes(&self, remove_persistent: bool) -> Result<(), RouterError> {
        let _guard = self.inner.gate.guard()?;
        self.inner
            .route_manager
            .remove_routes(self.inner.endpoint.address(), remove_persistent)
            .await
            .map_err(Into::into)
    }

    /// Stops the receive loop, withdraws non-persistent routes, and disposes
    /// the end point. Never fails; faults are logged.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        inner.gate.close().await;
        if let Err(err) =
            inner.route_manager.remove_routes(inner.endpoint.address(), false).await
        {
            log::warn!(
                "router({}): removing routes on dispose failed: {err}",
                inner.endpoint.address()
            );
        }
        inner.endpoint.dispose().await;
        inner.disposal.complete(());
        log::debug!("router({}): disposed", inner.endpoint.address());
    }
}

async fn dispatch_one<M: EndPointMultiplexer>(
    inner: &Arc<RouterInner<M>>,
    route: &Route,
    mut message: Message,
    publish: bool,
    end_point: &EndPointAddress,
    cancellation: &CancellationToken,
) -> Result<RouteResult, RouterError> {
    message.trim();
    if end_point == inner.endpoint.address() {
        return inner.handler.handle(route, message, publish, true).await;
    }

    RouterFraming { publish, local_dispatch: false, route: route.clone() }.encode(&mut message);
    let mut response = inner.endpoint.request(message, end_point, cancellation).await?;
    // Zero frames is the unhandled acknowledgement; handle_request pads a
    // handled reply to at least one frame.
    let handled = response.frame_index() > 0;
    response.trim();
    Ok(RouteResult { response, handled })
}

/// Point-to-point: first handled response wins, later levels and targets are
/// not invoked. Failed attempts are logged and skipped.
async fn send_first_match<M: EndPointMultiplexer>(
    inner: &Arc<RouterInner<M>>,
    hierarchy: &RouteHierarchy,
    message: &Message,
    cancellation: &CancellationToken,
) -> Result<Vec<Message>, RouterError> {
    for route in hierarchy {
        let targets = inner.route_manager.get_routes(route).await?;
        for target in targets.iter().rev() {
            if target.options.contains(RouteRegistrationOptions::PUBLISH_ONLY) {
                continue;
            }
            if target.options.contains(RouteRegistrationOptions::LOCAL_DISPATCH_ONLY)
                && target.end_point != *inner.endpoint.address()
            {
                continue;
            }
            match dispatch_one(inner, route, message.clone(), false, &target.end_point, cancellation)
                .await
            {
                Ok(result) if result.handled => return Ok(vec![result.response]),
                Ok(_) => {}
                Err(err) => {
                    log::warn!(
                        "router({}): point-to-point {route} to {} failed: {err}",
                        inner.endpoint.address(),
                        target.end_point
                    );
                }
            }
        }
    }
    Ok(Vec::new())
}

/// Publish: fan out concurrently, each end point at most once across the
/// hierarchy, and collect every handled response.
async fn publish_all<M: EndPointMultiplexer>(
    inner: &Arc<RouterInner<M>>,
    hierarchy: &RouteHierarchy,
    message: &Message,
    cancellation: &CancellationToken,
) -> Result<Vec<Message>, RouterError> {
    let mut seen: HashSet<EndPointAddress> = HashSet::new();
    let mut responses = Vec::new();

    for route in hierarchy {
        let targets = inner.route_manager.get_routes(route).await?;
        let mut round: JoinSet<(EndPointAddress, Result<RouteResult, RouterError>)> =
            JoinSet::new();
        for target in targets {
            if target.options.contains(RouteRegistrationOptions::LOCAL_DISPATCH_ONLY)
                && target.end_point != *inner.endpoint.address()
            {
                continue;
            }
            if !seen.insert(target.end_point.clone()) {
                continue;
            }
            let inner = inner.clone();
            let route = route.clone();
            let message = message.clone();
            let cancellation = cancellation.clone();
            round.spawn(async move {
                let result = dispatch_one(
                    &inner,
                    &route,
                    message,
                    true,
                    &target.end_point,
                    &cancellation,
                )
                .await;
                (target.end_point, result)
            });
        }

        while let Some(joined) = round.join_next().await {
            match joined {
                Ok((_, Ok(result))) if result.handled => responses.push(result.response),
                Ok((_, Ok(_))) => {}
                Ok((end_point, Err(err))) => {
                    log::warn!(
                        "router({}): publish {route} to {end_point} failed: {err}",
                        inner.endpoint.address()
                    );
                }
                Err(err) => {
                    log::warn!("router({}): publish task failed: {err}", inner.endpoint.address());
                }
            }
        }
    }
    Ok(responses)
}

async fn run_receive_loop<M: EndPointMultiplexer>(inner: Arc<RouterInner<M>>) {
    let cancel = inner.gate.token();
    log::trace!("router({}): receive loop started", inner.endpoint.address());
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = inner.endpoint.receive() => received,
        };
        match received {
            Ok(request) => {
                tokio::spawn(handle_request(inner.clone(), request));
            }
            Err(FabricError::Disposed) => break,
            Err(err) => {
                log::warn!("router({}): receive failed: {err}", inner.endpoint.address());
            }
        }
    }
    log::trace!("router({}): receive loop stopped", inner.endpoint.address());
}

async fn handle_request<M: EndPointMultiplexer>(
    inner: Arc<RouterInner<M>>,
    mut request: IncomingRequest<M>,
) {
    let mut message = request.take_message();
    let framing = match RouterFraming::decode(&mut message) {
        Ok(framing) => framing,
        Err(err) => {
            log::warn!(
                "router({}): dropping message without router framing: {err}",
                inner.endpoint.address()
            );
            return;
        }
    };

    let outcome = inner
        .handler
        .handle(&framing.route, message, framing.publish, framing.local_dispatch)
        .await;
    let reply = match outcome {
        Ok(result) if result.handled => {
            let mut response = result.response;
            // A handled reply carries at least one frame; only the unhandled
            // acknowledgement goes out frameless.
            if response.frame_index() == 0 {
                let _ = response.push_frame();
            }
            request.respond(response).await
        }
        Ok(_) => request.acknowledge().await,
        Err(err) => {
            log::warn!(
                "router({}): handler for {} failed: {err}",
                inner.endpoint.address(),
                framing.route
            );
            request.acknowledge().await
        }
    };
    if let Err(err) = reply {
        log::warn!("router({}): reply failed: {err}", inner.endpoint.address());
    }
}
