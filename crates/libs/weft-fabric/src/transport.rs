//! The physical transport boundary the fabric is multiplexed over.

use std::sync::Arc;

use async_trait::async_trait;
use weft_wire::{EndPointAddress, Message, TransportAddress};

use crate::FabricError;

/// One addressable packet stream on the physical transport.
#[async_trait]
pub trait PhysicalEndPoint: Send + Sync + 'static {
    type Address: TransportAddress;

    /// The transport address remote peers reach this end point under.
    fn local_address(&self) -> Self::Address;

    /// Transmits the message's visible frames to `address`.
    async fn send(&self, message: &Message, address: &Self::Address) -> Result<(), FabricError>;

    /// The next inbound message and the address it came from.
    async fn receive(&self) -> Result<(Message, Self::Address), FabricError>;
}

/// A physical transport carrying many named channels.
///
/// A channel of a given name delivers to the same-named channel on the
/// destination host, so peers demultiplex without decoding envelopes. The
/// fabric runs one channel per logical end point, named by
/// [`end_point_channel`].
#[async_trait]
pub trait EndPointMultiplexer: Send + Sync + 'static {
    type Address: TransportAddress;
    type EndPoint: PhysicalEndPoint<Address = Self::Address>;

    /// The transport address of this host.
    fn local_address(&self) -> Self::Address;

    /// Opens the channel with the given name.
    async fn open(&self, channel: &str) -> Result<Arc<Self::EndPoint>, FabricError>;
}

/// The multiplexer channel name carrying traffic for a logical end point.
pub fn end_point_channel(end_point: &EndPointAddress) -> String {
    format!("end-points/{end_point}")
}
