//! In-process multiplexed transport.
//!
//! [`LoopbackNetwork`] connects any number of in-process hosts. Messages
//! cross it in wire form, so only visible frames travel, exactly as on a real
//! transport. Per-address fault injection and delivery counters back the
//! fabric's own tests; the transport is also usable as-is for single-process
//! deployments.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use weft_wire::{Message, TransportAddress, WireError};

use crate::transport::{EndPointMultiplexer, PhysicalEndPoint};
use crate::FabricError;

/// Transport address of a loopback host. The default (empty) address is the
/// unset value.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct LoopbackAddress(Arc<str>);

impl LoopbackAddress {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TransportAddress for LoopbackAddress {
    fn to_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        std::str::from_utf8(bytes)
            .map(Self::new)
            .map_err(|_| WireError::InvalidTransportAddress)
    }
}

impl fmt::Display for LoopbackAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for LoopbackAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoopbackAddress({})", self.0)
    }
}

type Mailbox = mpsc::UnboundedSender<(Message, LoopbackAddress)>;

#[derive(Default)]
struct NetworkInner {
    mailboxes: Mutex<HashMap<(LoopbackAddress, String), Mailbox>>,
    failures: Mutex<HashMap<LoopbackAddress, u32>>,
    delivered: Mutex<HashMap<LoopbackAddress, usize>>,
    wire_sends: AtomicUsize,
}

/// The shared in-process network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host on this network, addressable under the given name.
    pub fn host(&self, address: impl AsRef<str>) -> Arc<LoopbackHost> {
        Arc::new(LoopbackHost {
            network: self.inner.clone(),
            address: LoopbackAddress::new(address),
        })
    }

    /// Makes the next `count` sends to `address` fail with a transport
    /// error.
    pub fn fail_next_sends_to(&self, address: &LoopbackAddress, count: u32) {
        lock(&self.inner.failures).insert(address.clone(), count);
    }

    /// Total send attempts across the network, failed ones included.
    pub fn wire_send_count(&self) -> usize {
        self.inner.wire_sends.load(Ordering::Acquire)
    }

    /// Messages successfully delivered to `address`.
    pub fn delivered_count(&self, address: &LoopbackAddress) -> usize {
        lock(&self.inner.delivered).get(address).copied().unwrap_or(0)
    }
}

/// One addressable host: an [`EndPointMultiplexer`] over the network.
pub struct LoopbackHost {
    network: Arc<NetworkInner>,
    address: LoopbackAddress,
}

#[async_trait]
impl EndPointMultiplexer for LoopbackHost {
    type Address = LoopbackAddress;
    type EndPoint = LoopbackEndPoint;

    fn local_address(&self) -> LoopbackAddress {
        self.address.clone()
    }

    async fn open(&self, channel: &str) -> Result<Arc<LoopbackEndPoint>, FabricError> {
        let (tx, rx) = mpsc::unbounded_channel();
        // First registration per (host, channel) receives; a later open of
        // the same name is send-only.
        lock(&self.network.mailboxes)
            .entry((self.address.clone(), channel.to_owned()))
            .or_insert_with(|| tx.clone());
        Ok(Arc::new(LoopbackEndPoint {
            network: self.network.clone(),
            host: self.address.clone(),
            channel: channel.to_owned(),
            mailbox_tx: tx,
            mailbox_rx: TokioMutex::new(rx),
        }))
    }
}

/// One channel of a loopback host.
pub struct LoopbackEndPoint {
    network: Arc<NetworkInner>,
    host: LoopbackAddress,
    channel: String,
    mailbox_tx: Mailbox,
    mailbox_rx: TokioMutex<mpsc::UnboundedReceiver<(Message, LoopbackAddress)>>,
}

#[async_trait]
impl PhysicalEndPoint for LoopbackEndPoint {
    type Address = LoopbackAddress;

    fn local_address(&self) -> LoopbackAddress {
        self.host.clone()
    }

    async fn send(&self, message: &Message, address: &LoopbackAddress) -> Result<(), FabricError> {
        if address.is_unset() {
            return Err(FabricError::transport("destination address is unset"));
        }
        self.network.wire_sends.fetch_add(1, Ordering::AcqRel);

        {
            let mut failures = lock(&self.network.failures);
            if let Some(remaining) = failures.get_mut(address) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FabricError::transport(format!("injected failure to {address}")));
                }
            }
        }

        let target = lock(&self.network.mailboxes)
            .get(&(address.clone(), self.channel.clone()))
            .cloned();
        let Some(target) = target else {
            return Err(FabricError::transport(format!(
                "no listener for {} at {address}",
                self.channel
            )));
        };

        let wire = message.to_bytes();
        let delivered = Message::from_bytes(&wire)
            .map_err(|err| FabricError::transport(format!("wire corruption: {err}")))?;
        target
            .send((delivered, self.host.clone()))
            .map_err(|_| FabricError::transport("listener closed"))?;

        *lock(&self.network.delivered).entry(address.clone()).or_insert(0) += 1;
        Ok(())
    }

    async fn receive(&self) -> Result<(Message, LoopbackAddress), FabricError> {
        let mut mailbox = self.mailbox_rx.lock().await;
        mailbox.recv().await.ok_or_else(|| FabricError::transport("channel closed"))
    }
}

impl Drop for LoopbackEndPoint {
    fn drop(&mut self) {
        let mut mailboxes = lock(&self.network.mailboxes);
        let key = (self.host.clone(), self.channel.clone());
        if let Some(registered) = mailboxes.get(&key) {
            if registered.same_channel(&self.mailbox_tx) {
                mailboxes.remove(&key);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
