//! Router dispatch semantics over the full stack: loopback transport,
//! in-process coordination service, fabric, and request/reply.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use weft_coord::MemoryCoordinationService;
use weft_directory::{RouteManager, RouteRegistrationOptions};
use weft_fabric::loopback::{LoopbackHost, LoopbackNetwork};
use weft_fabric::{EndPointManager, FabricConfig, InOrderScheduler};
use weft_router::{MessageRouter, RouteMessageHandler, RouteResult, RouterError};
use weft_wire::{EndPointAddress, Message, Route, RouteHierarchy};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    end_point: String,
    route: String,
    publish: bool,
    local_dispatch: bool,
}

#[derive(Default)]
struct Journal {
    calls: Mutex<Vec<Call>>,
}

impl Journal {
    fn record(&self, call: Call) {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }

    fn calls(&self) -> Vec<Call> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn end_points(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.end_point).collect()
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Handle,
    HandleEmpty,
    Pass,
    Fail,
}

struct TestHandler {
    name: String,
    behavior: Behavior,
    journal: Arc<Journal>,
}

#[async_trait]
impl RouteMessageHandler for TestHandler {
    async fn handle(
        &self,
        route: &Route,
        _message: Message,
        publish: bool,
        local_dispatch: bool,
    ) -> Result<RouteResult, RouterError> {
        self.journal.record(Call {
            end_point: self.name.clone(),
            route: route.as_str().to_owned(),
            publish,
            local_dispatch,
        });
        match self.behavior {
            Behavior::Handle => {
                Ok(RouteResult::handled(Message::with_payload(self.name.clone().into_bytes())))
            }
            Behavior::HandleEmpty => Ok(RouteResult::handled(Message::new())),
            Behavior::Pass => Ok(RouteResult::unhandled()),
            Behavior::Fail => Err(RouterError::handler("deliberate failure")),
        }
    }
}

struct TestNet {
    network: LoopbackNetwork,
    coord: Arc<MemoryCoordinationService>,
    route_manager: Arc<RouteManager>,
    journal: Arc<Journal>,
    managers: Vec<EndPointManager<LoopbackHost>>,
}

impl TestNet {
    fn new() -> Self {
        let coord = Arc::new(MemoryCoordinationService::new());
        Self {
            network: LoopbackNetwork::new(),
            route_manager: Arc::new(RouteManager::new(coord.clone())),
            coord,
            journal: Arc::new(Journal::default()),
            managers: Vec::new(),
        }
    }

    async fn router(&mut self, name: &str, behavior: Behavior) -> MessageRouter<LoopbackHost> {
        let manager = EndPointManager::start(
            self.network.host(format!("host-{name}")),
            self.coord.clone(),
            Arc::new(InOrderScheduler),
            FabricConfig::new().with_retry_base(Duration::from_millis(10)),
        );
        let handler = Arc::new(TestHandler {
            name: name.to_owned(),
            behavior,
            journal: self.journal.clone(),
        });
        let router = MessageRouter::create(
            &manager,
            EndPointAddress::new(name).expect("valid name"),
            handler,
            self.route_manager.clone(),
        )
        .await
        .expect("create router");
        self.managers.push(manager);
        router
    }
}

fn hierarchy() -> RouteHierarchy {
    RouteHierarchy::new(vec![Route::new("msg.Concrete"), Route::new("msg.Base")])
        .expect("non-empty")
}

fn response_names(responses: &[Message]) -> Vec<String> {
    let mut names: Vec<String> = responses
        .iter()
        .map(|message| {
            String::from_utf8(message.current_frame().expect("payload").bytes().to_vec())
                .expect("utf-8 payload")
        })
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn publish_invokes_every_end_point_once_across_the_hierarchy() {
    let mut net = TestNet::new();
    let e1 = net.router("E1", Behavior::Handle).await;
    let e2 = net.router("E2", Behavior::Handle).await;
    let e3 = net.router("E3", Behavior::Handle).await;
    let publisher = net.router("P", Behavior::Pass).await;

    let concrete = Route::new("msg.Concrete");
    let base = Route::new("msg.Base");
    e1.register_route(&concrete, RouteRegistrationOptions::TRANSIENT).await.expect("register");
    e2.register_route(&concrete, RouteRegistrationOptions::TRANSIENT).await.expect("register");
    e2.register_route(&base, RouteRegistrationOptions::TRANSIENT).await.expect("register");
    e3.register_route(&base, RouteRegistrationOptions::TRANSIENT).await.expect("register");

    let responses = timeout(
        Duration::from_secs(2),
        publisher.route_hierarchy(
            &hierarchy(),
            &Message::with_payload(b"event".to_vec()),
            true,
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("timely")
    .expect("publish");

    assert_eq!(response_names(&responses), ["E1", "E2", "E3"]);
    let mut invoked = net.journal.end_points();
    invoked.sort();
    assert_eq!(invoked, ["E1", "E2", "E3"]);
    assert!(net.journal.calls().iter().all(|call| call.publish && !call.local_dispatch));
}

#[tokio::test]
async fn point_to_point_stops_at_the_first_handled_end_point() {
    let mut net = TestNet::new();
    let e1 = net.router("E1", Behavior::Pass).await;
    let e2 = net.router("E2", Behavior::Handle).await;
    let e3 = net.router("E3", Behavior::Handle).await;
    let sender = net.router("P", Behavior::Pass).await;

    let concrete = Route::new("msg.Concrete");
    let base = Route::new("msg.Base");
    e1.register_route(&concrete, RouteRegistrationOptions::TRANSIENT).await.expect("register");
    e2.register_route(&concrete, RouteRegistrationOptions::TRANSIENT).await.expect("register");
    e3.register_route(&base, RouteRegistrationOptions::TRANSIENT).await.expect("register");

    let responses = timeout(
        Duration::from_secs(2),
        sender.route_hierarchy(
            &hierarchy(),
            &Message::with_payload(b"task".to_vec()),
            false,
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("timely")
    .expect("dispatch");

    // Within a level, targets are walked in reverse registration order, so
    // E2 wins immediately; neither E1 nor the base level is invoked.
    assert_eq!(response_names(&responses), ["E2"]);
    assert_eq!(net.journal.end_points(), ["E2"]);
}

#[tokio::test]
async fn point_to_point_walks_levels_most_specific_first() {
    let mut net = TestNet::new();
    let e1 = net.router("E1", Behavior::Pass).await;
    let e2 = net.router("E2", Behavior::Pass).await;
    let e3 = net.router("E3", Behavior::Handle).await;
    let sender = net.router("P", Behavior::Pass).await;

    let concrete = Route::new("msg.Concrete");
    let base = Route::new("msg.Base");
    e1.register_route(&concrete, RouteRegistrationOptions::TRANSIENT).await.expect("register");
    e2.register_route(&concrete, RouteRegistrationOptions::TRANSIENT).await.expect("register");
    e3.register_route(&base, RouteRegistrationOptions::TRANSIENT).await.expect("register");

    let responses = timeout(
        Duration::from_secs(2),
        sender.route_hierarchy(
            &hierarchy(),
            &Message::with_payload(b"task".to_vec()),
            false,
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("timely")
    .expect("dispatch");

    assert_eq!(response_names(&responses), ["E3"]);
    assert_eq!(net.journal.end_points(), ["E2", "E1", "E3"]);
}

#[tokio::test]
async fn publish_only_end_points_never_get_point_to_point_dispatch() {
    let mut net = TestNet::new();
    let e1 = net.router("E1", Behavior::Handle).await;
    let e2 = net.router("E2", Behavior::Handle).await;
    let sender = net.router("P", Behavior::Pass).await;

    let concrete = Route::new("msg.Concrete");
    e1.register_route(
        &concrete,
        RouteRegistrationOptions::TRANSIENT | RouteRegistrationOptions::PUBLISH_ONLY,
    )
    .await
    .expect("register");
    e2.register_route(&concrete, RouteRegistrationOptions::TRANSIENT).await.expect("register");

    let single = Route::new("msg.Concrete");
    let responses = sender
        .route_hierarchy(
            &RouteHierarchy::from(single),
            &Message::with_payload(b"task".to_vec()),
            false,
            &CancellationToken::new(),
        )
        .await
        .expect("dispatch");
    assert_eq!(response_names(&responses), ["E2"]);
    assert_eq!(net.journal.end_points(), ["E2"]);

    // The same registration is still fanned out to on publish.
    let responses = sender
        .route_hierarchy(
            &RouteHierarchy::from(Route::new("msg.Concrete")),
            &Message::with_payload(b"event".to_vec()),
            true,
            &CancellationToken::new(),
        )
        .await
        .expect("publish");
    assert_eq!(response_names(&responses), ["E1", "E2"]);
}

#[tokio::test]
async fn local_dispatch_only_routes_are_invisible_to_other_end_points() {
    let mut net = TestNet::new();
    let e1 = net.router("E1", Behavior::Handle).await;
    let sender = net.router("P", Behavior::Handle).await;

    let route = Route::new("msg.Internal");
    e1.register_route(
        &route,
        RouteRegistrationOptions::TRANSIENT | RouteRegistrationOptions::LOCAL_DISPATCH_ONLY,
    )
    .await
    .expect("register");

    let responses = sender
        .route_hierarchy(
            &RouteHierarchy::from(route.clone()),
            &Message::with_payload(b"private".to_vec()),
            true,
            &CancellationToken::new(),
        )
        .await
        .expect("publish");
    assert!(responses.is_empty());
    assert!(net.journal.calls().is_empty());

    // The registering end point itself still dispatches, locally.
    let responses = e1
        .route_hierarchy(
            &RouteHierarchy::from(route),
            &Message::with_payload(b"private".to_vec()),
            true,
            &CancellationToken::new(),
        )
        .await
        .expect("publish");
    assert_eq!(response_names(&responses), ["E1"]);
    let calls = net.journal.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].local_dispatch);
}

#[tokio::test]
async fn failed_handlers_read_as_unhandled_for_point_to_point() {
    let mut net = TestNet::new();
    let e1 = net.router("E1", Behavior::Handle).await;
    let e2 = net.router("E2", Behavior::Fail).await;
    let sender = net.router("P", Behavior::Pass).await;

    let route = Route::new("msg.Concrete");
    e1.register_route(&route, RouteRegistrationOptions::TRANSIENT).await.expect("register");
    e2.register_route(&route, RouteRegistrationOptions::TRANSIENT).await.expect("register");

    let responses = timeout(
        Duration::from_secs(2),
        sender.route_hierarchy(
            &RouteHierarchy::from(route),
            &Message::with_payload(b"task".to_vec()),
            false,
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("timely")
    .expect("dispatch");

    // E2 is tried first, fails, and the dispatch falls through to E1.
    assert_eq!(response_names(&responses), ["E1"]);
    assert_eq!(net.journal.end_points(), ["E2", "E1"]);
}

#[tokio::test]
async fn empty_handled_response_still_reads_as_handled() {
    let mut net = TestNet::new();
    let e1 = net.router("E1", Behavior::Handle).await;
    let e2 = net.router("E2", Behavior::HandleEmpty).await;
    let sender = net.router("P", Behavior::Pass).await;

    let route = Route::new("msg.Concrete");
    e1.register_route(&route, RouteRegistrationOptions::TRANSIENT).await.expect("register");
    e2.register_route(&route, RouteRegistrationOptions::TRANSIENT).await.expect("register");

    let responses = timeout(
        Duration::from_secs(2),
        sender.route_hierarchy(
            &RouteHierarchy::from(route.clone()),
            &Message::with_payload(b"task".to_vec()),
            false,
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("timely")
    .expect("dispatch");

    // E2 is tried first and handles with an empty response; that must not
    // read as unhandled, so the dispatch never falls through to E1.
    assert_eq!(responses.len(), 1);
    assert!(responses[0].current_frame().expect("padded frame").is_empty());
    assert_eq!(net.journal.end_points(), ["E2"]);

    // The empty response also survives a publish fan-out.
    let responses = timeout(
        Duration::from_secs(2),
        sender.route_hierarchy(
            &RouteHierarchy::from(route),
            &Message::with_payload(b"event".to_vec()),
            true,
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("timely")
    .expect("publish");
    assert_eq!(responses.len(), 2);
}

#[tokio::test]
async fn dispose_withdraws_the_routes() {
    let mut net = TestNet::new();
    let e1 = net.router("E1", Behavior::Handle).await;

    let route = Route::new("msg.Concrete");
    e1.register_route(&route, RouteRegistrationOptions::TRANSIENT).await.expect("register");
    assert_eq!(net.route_manager.get_routes(&route).await.expect("resolve").len(), 1);

    e1.dispose().await;
    e1.disposal().wait().await;
    assert!(net.route_manager.get_routes(&route).await.expect("resolve").is_empty());

    let err = e1
        .register_route(&route, RouteRegistrationOptions::TRANSIENT)
        .await
        .expect_err("disposed router refuses registration");
    assert!(matches!(err, RouterError::Disposed));
}

#[tokio::test]
async fn remote_dispatch_carries_the_route_and_payload() {
    let mut net = TestNet::new();
    let e1 = net.router("E1", Behavior::Handle).await;
    let sender = net.router("P", Behavior::Pass).await;

    let route = Route::new("orders.PlaceOrder");
    e1.register_route(&route, RouteRegistrationOptions::TRANSIENT).await.expect("register");

    let result = timeout(
        Duration::from_secs(2),
        sender.route(
            &route,
            Message::with_payload(b"order #42".to_vec()),
            false,
            e1.address(),
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("timely")
    .expect("dispatch");

    assert!(result.handled);
    assert_eq!(result.response.current_frame().expect("payload").bytes(), b"E1");
    let calls = net.journal.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].route, "orders.PlaceOrder");
    assert!(!calls[0].publish);
    assert!(!calls[0].local_dispatch);
}
