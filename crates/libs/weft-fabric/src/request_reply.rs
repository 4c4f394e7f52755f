//! Request/reply correlation over a logical end point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;
use weft_lifecycle::{linked, Completion, DisposalGate};
use weft_wire::{EndPointAddress, Message, RequestFraming, RequestKind, RoutingEnvelope};

use crate::endpoint::LogicalEndPoint;
use crate::transport::EndPointMultiplexer;
use crate::FabricError;

const REQUEST_QUEUE_LEN: usize = 128;

enum ReplyOutcome {
    Response(Message),
    Cancelled,
}

struct RequestReplyInner<M: EndPointMultiplexer> {
    endpoint: LogicalEndPoint<M>,
    next_seq: AtomicI32,
    pending: Mutex<HashMap<i32, oneshot::Sender<ReplyOutcome>>>,
    remote_cancellations: Mutex<HashMap<i32, CancellationToken>>,
    requests_tx: mpsc::Sender<IncomingRequest<M>>,
    requests_rx: TokioMutex<mpsc::Receiver<IncomingRequest<M>>>,
    gate: DisposalGate,
    disposal: Completion<()>,
}

/// Request/reply layer over a [`LogicalEndPoint`].
///
/// Outbound requests get a fresh sequence number and a reply future keyed by
/// it. Caller cancellation after transmission goes on the wire as a
/// `CancellationRequest`; the future then resolves only on the peer's
/// `CancellationResponse` or on shutdown. Inbound requests surface as
/// [`IncomingRequest`]s carrying a token that fires when the remote sender
/// cancels.
pub struct RequestReplyEndPoint<M: EndPointMultiplexer> {
    inner: Arc<RequestReplyInner<M>>,
}

impl<M: EndPointMultiplexer> Clone for RequestReplyEndPoint<M> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<M: EndPointMultiplexer> RequestReplyEndPoint<M> {
    /// Wraps the end point and starts the inbound demultiplex loop.
    pub fn start(endpoint: LogicalEndPoint<M>) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_LEN);
        let inner = Arc::new(RequestReplyInner {
            endpoint,
            next_seq: AtomicI32::new(1),
            pending: Mutex::new(HashMap::new()),
            remote_cancellations: Mutex::new(HashMap::new()),
            requests_tx,
            requests_rx: TokioMutex::new(requests_rx),
            gate: DisposalGate::new(),
            disposal: Completion::new(),
        });
        tokio::spawn(run_demux_loop(inner.clone()));
        Self { inner }
    }

    pub fn logical_end_point(&self) -> &LogicalEndPoint<M> {
        &self.inner.endpoint
    }

    pub fn address(&self) -> &EndPointAddress {
        self.inner.endpoint.address()
    }

    pub fn disposal(&self) -> Completion<()> {
        self.inner.disposal.clone()
    }

    /// Sends a request to `remote` and awaits the correlated reply.
    ///
    /// Cancellation before transmission abandons the send and fails with
    /// [`FabricError::Cancelled`]. Cancellation after transmission sends a
    /// `CancellationRequest`; the call then returns only on the peer's
    /// reply, its `CancellationResponse`, or disposal.
    pub async fn request(
        &self,
        mut message: Message,
        remote: &EndPointAddress,
        cancellation: &CancellationToken,
    ) -> Result<Message, FabricError> {
        let inner = &self.inner;
        let _guard = inner.gate.guard()?;
        let cancel = linked(cancellation, &inner.gate.token());

        let seq = inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, mut reply_rx) = oneshot::channel();
        lock(&inner.pending).insert(seq, reply_tx);

        RequestFraming { seq_num: seq, kind: RequestKind::Request, corr_id: 0 }
            .encode(&mut message);

        tokio::select! {
            sent = inner.endpoint.send(message, remote) => {
                if let Err(err) = sent {
                    lock(&inner.pending).remove(&seq);
                    return Err(err);
                }
            }
            _ = cancel.cancelled() => {
                lock(&inner.pending).remove(&seq);
                return self.aborted(cancellation);
            }
        }

        tokio::select! {
            outcome = &mut reply_rx => return finish(outcome),
            _ = cancel.cancelled() => {
                if inner.gate.is_closed() {
                    lock(&inner.pending).remove(&seq);
                    return Err(FabricError::Disposed);
                }
                // Cancel over the wire; the reply future stays installed
                // until the peer acknowledges.
                self.transmit_cancellation(seq, remote.clone());
            }
        }

        let cancelled = inner.gate.token();
        tokio::select! {
            outcome = &mut reply_rx => finish(outcome),
            _ = cancelled.cancelled() => {
                lock(&inner.pending).remove(&seq);
                Err(FabricError::Disposed)
            }
        }
    }

    fn aborted(&self, cancellation: &CancellationToken) -> Result<Message, FabricError> {
        if cancellation.is_cancelled() {
            Err(FabricError::Cancelled)
        } else {
            Err(FabricError::Disposed)
        }
    }

    fn transmit_cancellation(&self, corr_id: i32, remote: EndPointAddress) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut message = Message::new();
            RequestFraming {
                seq_num: inner.next_seq.fetch_add(1, Ordering::Relaxed),
                kind: RequestKind::CancellationRequest,
                corr_id,
            }
            .encode(&mut message);
            if let Err(err) = inner.endpoint.send(message, &remote).await {
                log::debug!(
                    "rre({}): cancellation request for {corr_id} failed: {err}",
                    inner.endpoint.address()
                );
            }
        });
    }

    /// The next inbound request.
    pub async fn receive(&self) -> Result<IncomingRequest<M>, FabricError> {
        let _guard = self.inner.gate.guard()?;
        let mut queue = self.inner.requests_rx.lock().await;
        let cancelled = self.inner.gate.token();
        tokio::select! {
            _ = cancelled.cancelled() => Err(FabricError::Disposed),
            request = queue.recv() => request.ok_or(FabricError::Disposed),
        }
    }

    /// Stops the demultiplex loop, fails pending requests as disposed, and
    /// disposes the wrapped end point. Never fails.
    pub async fn dispose(&self) {
        self.inner.gate.close().await;
        lock(&self.inner.pending).clear();
        lock(&self.inner.remote_cancellations).clear();
        self.inner.endpoint.dispose().await;
        self.inner.disposal.complete(());
    }
}

fn finish(outcome: Result<ReplyOutcome, oneshot::error::RecvError>) -> Result<Message, FabricError> {
    match outcome {
        Ok(ReplyOutcome::Response(message)) => Ok(message),
        Ok(ReplyOutcome::Cancelled) => Err(FabricError::Cancelled),
        Err(_) => Err(FabricError::Disposed),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// An inbound request with its reply context.
///
/// The carried cancellation token fires when the remote sender transmits a
/// `CancellationRequest` for this request.
pub struct IncomingRequest<M: EndPointMultiplexer> {
    inner: Arc<RequestReplyInner<M>>,
    message: Message,
    seq_num: i32,
    cancellation: CancellationToken,
    envelope: RoutingEnvelope,
}

impl<M: EndPointMultiplexer> IncomingRequest<M> {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    /// Takes the request message, leaving an empty one behind.
    pub fn take_message(&mut self) -> Message {
        std::mem::take(&mut self.message)
    }

    /// The sender's logical name, when the envelope carries one.
    pub fn sender(&self) -> Option<&EndPointAddress> {
        self.envelope.local_end_point.as_ref()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Replies with a response message.
    pub async fn respond(self, mut response: Message) -> Result<(), FabricError> {
        RequestFraming {
            seq_num: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            kind: RequestKind::Response,
            corr_id: self.seq_num,
        }
        .encode(&mut response);
        self.inner.endpoint.send_reply_to(response, &self.envelope).await
    }

    /// Replies with an empty acknowledgement.
    pub async fn acknowledge(self) -> Result<(), FabricError> {
        self.respond(Message::new()).await
    }

    /// Acknowledges the sender's cancellation, resolving its reply future as
    /// cancelled.
    pub async fn respond_cancelled(self) -> Result<(), FabricError> {
        let mut response = Message::new();
        RequestFraming {
            seq_num: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            kind: RequestKind::CancellationResponse,
            corr_id: self.seq_num,
        }
        .encode(&mut response);
        self.inner.endpoint.send_reply_to(response, &self.envelope).await
    }
}

impl<M: EndPointMultiplexer> Drop for IncomingRequest<M> {
    fn drop(&mut self) {
        lock(&self.inner.remote_cancellations).remove(&self.seq_num);
    }
}

async fn run_demux_loop<M: EndPointMultiplexer>(inner: Arc<RequestReplyInner<M>>) {
    let cancel = inner.gate.token();
    log::trace!("rre({}): demux loop started", inner.endpoint.address());
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = inner.endpoint.receive() => received,
        };
        let mut message = match received {
            Ok(message) => message,
            Err(FabricError::Disposed) => break,
            Err(err) => {
                log::warn!("rre({}): receive failed: {err}", inner.endpoint.address());
                continue;
            }
        };

        // Re-expose the routing envelope to capture the reply context, then
        // pop our framing.
        message.push_frame();
        let envelope = match RoutingEnvelope::decode(&mut message) {
            Ok(envelope) => envelope,
            Err(err) => {
                let _ = message.pop_frame();
                log::debug!(
                    "rre({}): dropping message with unreadable envelope: {err}",
                    inner.endpoint.address()
                );
                continue;
            }
        };
        let framing = match RequestFraming::decode(&mut message) {
            Ok(framing) => framing,
            Err(err) => {
                log::debug!(
                    "rre({}): dropping unframed message: {err}",
                    inner.endpoint.address()
                );
                continue;
            }
        };

        match framing.kind {
            RequestKind::Request => {
                let token = CancellationToken::new();
                lock(&inner.remote_cancellations).insert(framing.seq_num, token.clone());
                let request = IncomingRequest {
                    inner: inner.clone(),
                    message,
                    seq_num: framing.seq_num,
                    cancellation: token,
                    envelope,
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    queued = inner.requests_tx.send(request) => {
                        if queued.is_err() {
                            break;
                        }
                    }
                }
            }
            RequestKind::Response => {
                if let Some(reply) = lock(&inner.pending).remove(&framing.corr_id) {
                    let _ = reply.send(ReplyOutcome::Response(message));
                } else {
                    log::trace!(
                        "rre({}): response for unknown correlation {}",
                        inner.endpoint.address(),
                        framing.corr_id
                    );
                }
            }
            RequestKind::CancellationRequest => {
                if let Some(token) = lock(&inner.remote_cancellations).get(&framing.corr_id) {
                    token.cancel();
                }
            }
            RequestKind::CancellationResponse => {
                if let Some(reply) = lock(&inner.pending).remove(&framing.corr_id) {
                    let _ = reply.send(ReplyOutcome::Cancelled);
                }
            }
        }
    }
    log::trace!("rre({}): demux loop stopped", inner.endpoint.address());
}
