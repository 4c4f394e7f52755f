//! # weft-fabric
//!
//! The weft messaging fabric: logical end points multiplexed over one
//! physical transport, with name resolution, replica scheduling, retry, and
//! request/reply correlation.
//!
//! The send path runs user → [`LogicalEndPoint::send`] → the
//! [`EndPointManager`] queue → route-map resolution → scheduler → envelope
//! encoding → transport. The receive path mirrors it: transport → the end
//! point's receive loop → envelope decode → misroute reflection → the owner's
//! receive queue. Sends whose destination resolves to this host short-circuit
//! without touching the transport.
//!
//! [`RequestReplyEndPoint`] adds sequence numbers, reply correlation, and
//! cancellation propagation over the wire; the message router builds on it.

mod config;
mod endpoint;
mod error;
mod manager;
mod request_reply;
mod scheduler;
mod transport;

pub mod loopback;

pub use config::{FabricConfig, RetryLimit};
pub use endpoint::LogicalEndPoint;
pub use error::FabricError;
pub use manager::EndPointManager;
pub use request_reply::{IncomingRequest, RequestReplyEndPoint};
pub use scheduler::{AddressScheduler, InOrderScheduler, ShuffleScheduler};
pub use transport::{end_point_channel, EndPointMultiplexer, PhysicalEndPoint};
