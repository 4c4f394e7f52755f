//! The end-point manager: multiplexes logical end points over one physical
//! transport and owns the outbound send machinery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use weft_coord::CoordinationService;
use weft_directory::RouteMap;
use weft_lifecycle::{Completion, DisposalGate};
use weft_wire::{EndPointAddress, EnvelopeKind, Message, RoutingEnvelope, TransportAddress};

use crate::endpoint::{dispose_end_point, run_receive_loop, EndPointState, LogicalEndPoint};
use crate::scheduler::AddressScheduler;
use crate::transport::{end_point_channel, EndPointMultiplexer, PhysicalEndPoint};
use crate::{FabricConfig, FabricError, RetryLimit};

/// One queued outbound send. The sender's oneshot completes the caller's
/// future exactly once; dropping it reads as "disposed" on the caller side.
pub(crate) struct TxItem {
    pub(crate) message: Message,
    pub(crate) local: EndPointAddress,
    pub(crate) remote: EndPointAddress,
    pub(crate) attempt: u32,
    pub(crate) done: oneshot::Sender<Result<(), FabricError>>,
}

pub(crate) struct ManagerInner<M: EndPointMultiplexer> {
    pub(crate) mux: Arc<M>,
    pub(crate) coord: Arc<dyn CoordinationService>,
    pub(crate) route_map: RouteMap<M::Address>,
    pub(crate) scheduler: Arc<dyn AddressScheduler<M::Address>>,
    pub(crate) config: FabricConfig,
    pub(crate) endpoints: Mutex<HashMap<EndPointAddress, Arc<EndPointState<M>>>>,
    outbound: Mutex<HashMap<EndPointAddress, Arc<M::EndPoint>>>,
    pub(crate) tx_queue: mpsc::Sender<TxItem>,
    pub(crate) gate: DisposalGate,
    initialization: Completion<Result<(), FabricError>>,
    disposal: Completion<()>,
}

/// Multiplexes logical end points over one physical transport.
///
/// The manager owns the route map, the replica scheduler, the table of live
/// logical end points, and a bounded queue of pending sends consumed by a
/// single send loop. Each dequeued send is dispatched off-loop: replicas are
/// resolved, tried in scheduler order, and the send is re-queued with
/// exponential backoff when none succeeds.
///
/// The manager is the sole owner of end-point state; [`LogicalEndPoint`]
/// handles are disposed explicitly.
pub struct EndPointManager<M: EndPointMultiplexer> {
    inner: Arc<ManagerInner<M>>,
}

impl<M: EndPointMultiplexer> EndPointManager<M> {
    /// Starts the manager: spawns the send loop and the session watcher.
    pub fn start(
        mux: Arc<M>,
        coord: Arc<dyn CoordinationService>,
        scheduler: Arc<dyn AddressScheduler<M::Address>>,
        config: FabricConfig,
    ) -> Self {
        let (tx_queue, queue_rx) = mpsc::channel(config.tx_queue_capacity());
        let inner = Arc::new(ManagerInner {
            mux,
            route_map: RouteMap::new(coord.clone()),
            coord,
            scheduler,
            config,
            endpoints: Mutex::new(HashMap::new()),
            outbound: Mutex::new(HashMap::new()),
            tx_queue,
            gate: DisposalGate::new(),
            initialization: Completion::new(),
            disposal: Completion::new(),
        });
        tokio::spawn(run_send_loop(inner.clone(), queue_rx));
        tokio::spawn(run_session_republish(inner.clone()));
        inner.initialization.complete(Ok(()));
        Self { inner }
    }

    pub fn local_address(&self) -> M::Address {
        self.inner.mux.local_address()
    }

    pub fn initialization(&self) -> Completion<Result<(), FabricError>> {
        self.inner.initialization.clone()
    }

    pub fn disposal(&self) -> Completion<()> {
        self.inner.disposal.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.gate.is_closed()
    }

    /// Creates and registers a logical end point.
    ///
    /// Fails with [`FabricError::AlreadyPresent`] when the name is taken in
    /// this manager. On success the end point's map entry is published and
    /// its receive loop is running.
    pub async fn create_logical_end_point(
        &self,
        address: EndPointAddress,
    ) -> Result<LogicalEndPoint<M>, FabricError> {
        let inner = &self.inner;
        let _guard = inner.gate.guard()?;
        if inner.lock_endpoints().contains_key(&address) {
            return Err(FabricError::AlreadyPresent(address));
        }

        let channel = inner.mux.open(&end_point_channel(&address)).await?;
        let (rx_tx, rx_queue) = mpsc::channel(inner.config.rx_queue_capacity());
        let state = Arc::new(EndPointState::new(address.clone(), channel, rx_tx, rx_queue));

        {
            let mut endpoints = inner.lock_endpoints();
            if endpoints.contains_key(&address) {
                return Err(FabricError::AlreadyPresent(address));
            }
            endpoints.insert(address.clone(), state.clone());
        }

        if let Err(err) = inner.route_map.map(&address, &inner.mux.local_address()).await {
            inner.lock_endpoints().remove(&address);
            let err = FabricError::from(err);
            state.initialization.complete(Err(err.clone()));
            state.disposal.complete(());
            return Err(err);
        }

        tokio::spawn(run_receive_loop(inner.clone(), state.clone()));
        state.initialization.complete(Ok(()));
        log::debug!("epm: created logical end point {address}");
        Ok(LogicalEndPoint::new(inner.clone(), state))
    }

    /// Shuts the manager down: stops the send loop, disposes every logical
    /// end point, and completes the disposal signal. Never fails.
    pub async fn dispose(&self) {
        self.inner.gate.close().await;

        let states: Vec<_> = self.inner.lock_endpoints().values().cloned().collect();
        let mut tasks = Vec::new();
        for state in states {
            let inner = self.inner.clone();
            tasks.push(tokio::spawn(async move {
                dispose_end_point(&inner, &state).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }

        self.inner.disposal.complete(());
        log::debug!("epm: disposed");
    }
}

impl<M: EndPointMultiplexer> ManagerInner<M> {
    pub(crate) fn lock_endpoints(
        &self,
    ) -> MutexGuard<'_, HashMap<EndPointAddress, Arc<EndPointState<M>>>> {
        match self.endpoints.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_outbound(&self) -> MutexGuard<'_, HashMap<EndPointAddress, Arc<M::EndPoint>>> {
        match self.outbound.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queues a send for resolution. The returned receiver resolves when
    /// some replica accepted the message, the send failed terminally, or the
    /// manager shut down; dropping it abandons the send at its next retry.
    pub(crate) async fn enqueue(
        &self,
        message: Message,
        local: EndPointAddress,
        remote: EndPointAddress,
    ) -> Result<oneshot::Receiver<Result<(), FabricError>>, FabricError> {
        let (done, completed) = oneshot::channel();
        let item = TxItem { message, local, remote, attempt: 1, done };
        let _guard = self.gate.guard()?;
        let cancelled = self.gate.token();
        tokio::select! {
            _ = cancelled.cancelled() => Err(FabricError::Disposed),
            queued = self.tx_queue.send(item) => {
                queued.map_err(|_| FabricError::Disposed)?;
                Ok(completed)
            }
        }
    }

    /// Envelope-encodes the message and hands it to the transport, or to a
    /// local end point when the destination is this host.
    ///
    /// The pushed envelope frame is popped on every exit path, so the
    /// caller's frame index is unchanged.
    pub(crate) async fn direct_send(
        &self,
        local: &EndPointAddress,
        remote: &EndPointAddress,
        address: &M::Address,
        message: &mut Message,
    ) -> Result<(), FabricError> {
        let envelope = RoutingEnvelope {
            kind: EnvelopeKind::Message,
            local_end_point: Some(local.clone()),
            local_address: self.mux.local_address().to_bytes(),
            remote_end_point: Some(remote.clone()),
            remote_address: address.to_bytes(),
        };
        envelope.encode(message);
        let result = self.transmit(remote, address, message).await;
        let _ = message.pop_frame();
        result
    }

    async fn transmit(
        &self,
        remote: &EndPointAddress,
        address: &M::Address,
        message: &Message,
    ) -> Result<(), FabricError> {
        if *address == self.mux.local_address() {
            return self.deliver_local(remote, message).await;
        }
        let channel = self.outbound_channel(remote).await?;
        channel.send(message, address).await
    }

    /// Local short-circuit: the destination host is this one, so the message
    /// never touches the transport. An unknown local end point is logged and
    /// dropped without surfacing an error.
    async fn deliver_local(
        &self,
        remote: &EndPointAddress,
        message: &Message,
    ) -> Result<(), FabricError> {
        let target = self.lock_endpoints().get(remote).cloned();
        match target {
            Some(state) => {
                self.deliver_inbound(&state, message.clone()).await;
                Ok(())
            }
            None => {
                log::warn!("epm: local end point {remote} not present, dropping message");
                Ok(())
            }
        }
    }

    /// Inbound path shared by the receive loop and the local short-circuit:
    /// decode the envelope, reflect misroutes, enqueue the rest.
    pub(crate) async fn deliver_inbound(&self, state: &EndPointState<M>, mut message: Message) {
        let envelope = match RoutingEnvelope::decode(&mut message) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!("lep({}): dropping malformed envelope: {err}", state.address);
                return;
            }
        };

        if envelope.remote_end_point.as_ref() != Some(&state.address) {
            self.reflect_misroute(&envelope, message).await;
            return;
        }

        match envelope.kind {
            EnvelopeKind::Message => {
                if state.rx_tx.send(message).await.is_err() {
                    log::debug!("lep({}): receive queue closed, dropping message", state.address);
                }
            }
            kind => {
                log::debug!("lep({}): dropping {kind:?} message", state.address);
            }
        }
    }

    /// Answers a message that reached the wrong end point with a `Misrouted`
    /// envelope, sender and receiver swapped, then drops the original.
    async fn reflect_misroute(&self, envelope: &RoutingEnvelope, mut message: Message) {
        let sender_address = match M::Address::from_bytes(&envelope.local_address) {
            Ok(address) if !address.is_unset() => address,
            _ => {
                log::debug!("epm: misrouted message has no usable sender address, dropping");
                return;
            }
        };
        let Some(sender) = envelope.local_end_point.clone() else {
            log::debug!("epm: misrouted message has no sender end point, dropping");
            return;
        };
        log::debug!(
            "epm: reflecting message for {:?} back to {sender}",
            envelope.remote_end_point
        );

        let reply = RoutingEnvelope {
            kind: EnvelopeKind::Misrouted,
            local_end_point: envelope.remote_end_point.clone(),
            local_address: self.mux.local_address().to_bytes(),
            remote_end_point: Some(sender.clone()),
            remote_address: envelope.local_address.clone(),
        };
        reply.encode(&mut message);

        let reflected = async {
            let channel = self.outbound_channel(&sender).await?;
            channel.send(&message, &sender_address).await
        };
        if let Err(err) = reflected.await {
            log::warn!("epm: reflecting misroute to {sender} failed: {err}");
        }
    }

    /// The cached outbound channel named for `remote`. Traffic for a logical
    /// end point always travels on that end point's channel.
    async fn outbound_channel(
        &self,
        remote: &EndPointAddress,
    ) -> Result<Arc<M::EndPoint>, FabricError> {
        if let Some(channel) = self.lock_outbound().get(remote).cloned() {
            return Ok(channel);
        }
        let channel = self.mux.open(&end_point_channel(remote)).await?;
        Ok(self.lock_outbound().entry(remote.clone()).or_insert(channel).clone())
    }
}

async fn run_send_loop<M: EndPointMultiplexer>(
    inner: Arc<ManagerInner<M>>,
    mut queue: mpsc::Receiver<TxItem>,
) {
    let cancel = inner.gate.token();
    log::trace!("epm: send loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = queue.recv() => {
                let Some(item) = item else { break };
                // Dispatch off-loop so one slow resolution cannot stall the
                // queue.
                tokio::spawn(dispatch(inner.clone(), item));
            }
        }
    }
    log::trace!("epm: send loop stopped");
}

/// One delivery attempt: resolve replicas, walk them in scheduler order,
/// re-queue with backoff when none succeeds.
async fn dispatch<M: EndPointMultiplexer>(inner: Arc<ManagerInner<M>>, mut item: TxItem) {
    if item.done.is_closed() {
        log::trace!("epm: send to {} abandoned by caller", item.remote);
        return;
    }

    let replicas = match inner.route_map.get_maps(&item.remote).await {
        Ok(replicas) => replicas,
        Err(err) => {
            log::debug!("epm: resolving {} failed: {err}", item.remote);
            Vec::new()
        }
    };

    for address in inner.scheduler.order(replicas) {
        match inner.direct_send(&item.local, &item.remote, &address, &mut item.message).await {
            Ok(()) => {
                let _ = item.done.send(Ok(()));
                return;
            }
            Err(err) => {
                log::debug!(
                    "epm: attempt {} to {} via {address:?} failed: {err}",
                    item.attempt,
                    item.remote
                );
            }
        }
    }

    if let RetryLimit::MaxAttempts(limit) = inner.config.retry_limit() {
        if item.attempt >= limit {
            let _ = item.done.send(Err(FabricError::Unreachable(item.remote.clone())));
            return;
        }
    }

    let delay = inner.config.backoff(item.attempt);
    item.attempt += 1;
    log::debug!("epm: no replica for {}, retrying in {delay:?}", item.remote);
    let cancelled = inner.gate.token();
    tokio::select! {
        // Dropping the item completes the caller's future as disposed.
        _ = cancelled.cancelled() => {}
        _ = tokio::time::sleep(delay) => {
            if item.done.is_closed() {
                return;
            }
            let _ = inner.tx_queue.send(item).await;
        }
    }
}

async fn run_session_republish<M: EndPointMultiplexer>(inner: Arc<ManagerInner<M>>) {
    let cancel = inner.gate.token();
    let mut sessions = inner.coord.watch_session();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = sessions.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = sessions.borrow().clone();
                log::debug!("epm: session {session} established, re-publishing end points");
                let local = inner.mux.local_address();
                let states: Vec<_> = inner.lock_endpoints().values().cloned().collect();
                for state in states {
                    if let Err(err) = inner.route_map.map(&state.address, &local).await {
                        log::warn!(
                            "lep({}): re-publish under session {session} failed: {err}",
                            state.address
                        );
                    }
                }
            }
        }
    }
}
