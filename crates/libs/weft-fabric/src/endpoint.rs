//! Logical end points: the named messaging endpoints applications hold.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as TokioMutex};
use weft_lifecycle::{Completion, DisposalGate};
use weft_wire::{EndPointAddress, Message, RoutingEnvelope, TransportAddress};

use crate::manager::ManagerInner;
use crate::transport::{EndPointMultiplexer, PhysicalEndPoint};
use crate::FabricError;

pub(crate) struct EndPointState<M: EndPointMultiplexer> {
    pub(crate) address: EndPointAddress,
    pub(crate) channel: Arc<M::EndPoint>,
    pub(crate) rx_tx: mpsc::Sender<Message>,
    rx_queue: TokioMutex<mpsc::Receiver<Message>>,
    pub(crate) gate: DisposalGate,
    pub(crate) initialization: Completion<Result<(), FabricError>>,
    pub(crate) disposal: Completion<()>,
}

impl<M: EndPointMultiplexer> EndPointState<M> {
    pub(crate) fn new(
        address: EndPointAddress,
        channel: Arc<M::EndPoint>,
        rx_tx: mpsc::Sender<Message>,
        rx_queue: mpsc::Receiver<Message>,
    ) -> Self {
        Self {
            address,
            channel,
            rx_tx,
            rx_queue: TokioMutex::new(rx_queue),
            gate: DisposalGate::new(),
            initialization: Completion::new(),
            disposal: Completion::new(),
        }
    }
}

/// Handle to a logical end point registered in an
/// [`crate::EndPointManager`].
///
/// The manager owns the underlying state; the handle is explicitly disposed.
/// Receivers share the queue; delivery of a message to one receiver is
/// exclusive.
pub struct LogicalEndPoint<M: EndPointMultiplexer> {
    manager: Arc<ManagerInner<M>>,
    state: Arc<EndPointState<M>>,
}

impl<M: EndPointMultiplexer> std::fmt::Debug for LogicalEndPoint<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalEndPoint")
            .field("address", &self.state.address)
            .finish()
    }
}

impl<M: EndPointMultiplexer> Clone for LogicalEndPoint<M> {
    fn clone(&self) -> Self {
        Self { manager: self.manager.clone(), state: self.state.clone() }
    }
}

impl<M: EndPointMultiplexer> LogicalEndPoint<M> {
    pub(crate) fn new(manager: Arc<ManagerInner<M>>, state: Arc<EndPointState<M>>) -> Self {
        Self { manager, state }
    }

    pub fn address(&self) -> &EndPointAddress {
        &self.state.address
    }

    /// The transport address this end point is published under.
    pub fn local_address(&self) -> M::Address {
        self.state.channel.local_address()
    }

    pub fn initialization(&self) -> Completion<Result<(), FabricError>> {
        self.state.initialization.clone()
    }

    pub fn disposal(&self) -> Completion<()> {
        self.state.disposal.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.gate.is_closed()
    }

    /// The next message addressed to this end point.
    ///
    /// The delivered message's envelope frame sits directly above the current
    /// frame index, where [`LogicalEndPoint::send_reply`] expects it.
    pub async fn receive(&self) -> Result<Message, FabricError> {
        let _guard = self.state.gate.guard()?;
        let mut queue = self.state.rx_queue.lock().await;
        let cancelled = self.state.gate.token();
        tokio::select! {
            _ = cancelled.cancelled() => Err(FabricError::Disposed),
            message = queue.recv() => message.ok_or(FabricError::Disposed),
        }
    }

    /// Sends to `remote`, resolving its replicas through the route map.
    ///
    /// Completes once some replica accepted the message; retries with
    /// backoff until then. Dropping the future abandons the send, as does
    /// disposing this end point.
    pub async fn send(&self, message: Message, remote: &EndPointAddress) -> Result<(), FabricError> {
        let completed = {
            let _guard = self.state.gate.guard()?;
            self.manager
                .enqueue(message, self.state.address.clone(), remote.clone())
                .await?
        };
        let cancelled = self.state.gate.token();
        tokio::select! {
            _ = cancelled.cancelled() => Err(FabricError::Disposed),
            result = completed => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(FabricError::Disposed),
            },
        }
    }

    /// Sends directly to a known transport address, bypassing resolution and
    /// retry.
    pub async fn send_to(
        &self,
        message: Message,
        remote: &EndPointAddress,
        address: &M::Address,
    ) -> Result<(), FabricError> {
        let _guard = self.state.gate.guard()?;
        if address.is_unset() {
            return Err(FabricError::transport("destination address is unset"));
        }
        let mut message = message;
        self.manager.direct_send(&self.state.address, remote, address, &mut message).await
    }

    /// Sends `response` back to the sender of `request`.
    ///
    /// The request must be positioned as delivered by
    /// [`LogicalEndPoint::receive`]: its envelope is re-exposed with a push,
    /// decoded, and popped again, so the caller's frame index is unchanged on
    /// every path.
    pub async fn send_reply(
        &self,
        response: Message,
        request: &mut Message,
    ) -> Result<(), FabricError> {
        let _guard = self.state.gate.guard()?;
        request.push_frame();
        let envelope = match RoutingEnvelope::decode(request) {
            Ok(envelope) => envelope,
            Err(err) => {
                let _ = request.pop_frame();
                return Err(err.into());
            }
        };
        self.reply_to_envelope(response, &envelope).await
    }

    /// Sends `response` to the sender recorded in a decoded envelope.
    pub async fn send_reply_to(
        &self,
        response: Message,
        reply_to: &RoutingEnvelope,
    ) -> Result<(), FabricError> {
        let _guard = self.state.gate.guard()?;
        self.reply_to_envelope(response, reply_to).await
    }

    async fn reply_to_envelope(
        &self,
        mut response: Message,
        envelope: &RoutingEnvelope,
    ) -> Result<(), FabricError> {
        if envelope.remote_end_point.as_ref() != Some(&self.state.address) {
            return Err(FabricError::WrongEndPoint {
                addressed: envelope
                    .remote_end_point
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                local: self.state.address.clone(),
            });
        }
        let remote = envelope.local_end_point.clone().ok_or(FabricError::NoReplyAddress)?;
        let address = M::Address::from_bytes(&envelope.local_address)?;
        if address.is_unset() {
            return Err(FabricError::NoReplyAddress);
        }
        self.manager
            .direct_send(&self.state.address, &remote, &address, &mut response)
            .await
    }

    /// Unregisters the end point, stops its receive loop, and removes it
    /// from the manager. Never fails; faults are logged.
    pub async fn dispose(&self) {
        dispose_end_point(&self.manager, &self.state).await;
    }
}

pub(crate) async fn run_receive_loop<M: EndPointMultiplexer>(
    inner: Arc<ManagerInner<M>>,
    state: Arc<EndPointState<M>>,
) {
    let cancel = state.gate.token();
    log::trace!("lep({}): receive loop started", state.address);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = state.channel.receive() => match received {
                Ok((message, _sender)) => inner.deliver_inbound(&state, message).await,
                Err(err) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    log::warn!("lep({}): receive failed: {err}", state.address);
                }
            }
        }
    }
    log::trace!("lep({}): receive loop stopped", state.address);
}

pub(crate) async fn dispose_end_point<M: EndPointMultiplexer>(
    inner: &Arc<ManagerInner<M>>,
    state: &Arc<EndPointState<M>>,
) {
    state.gate.close().await;

    if let Err(err) = inner.route_map.unmap(&state.address, &inner.mux.local_address()).await {
        log::warn!("lep({}): unmap on dispose failed: {err}", state.address);
    }

    {
        let mut endpoints = inner.lock_endpoints();
        if let Some(current) = endpoints.get(&state.address) {
            if Arc::ptr_eq(current, state) {
                endpoints.remove(&state.address);
            }
        }
    }

    state.disposal.complete(());
    log::debug!("lep({}): disposed", state.address);
}
