//! # weft-wire
//!
//! Wire-level primitives for the weft messaging fabric.
//!
//! This crate defines the shared vocabulary of the fabric (logical
//! [`EndPointAddress`]es, handler [`Route`]s, the [`TransportAddress`]
//! conversion boundary) plus the layered [`Message`] frame stack and the
//! three protocol framings carried on it:
//!
//! ```text
//! [routing envelope]          weft_wire::envelope  (outermost)
//! [request/reply framing]     weft_wire::framing::RequestFraming
//! [router framing]            weft_wire::framing::RouterFraming
//! [payload frames]            opaque to this crate
//! ```
//!
//! Each protocol layer pushes one frame on send and pops one frame on
//! receive; nesting is therefore the inverse of the send call chain. All
//! multi-byte integers are little-endian, strings are UTF-8 without BOM, and
//! length prefixes are `i32`.

pub mod envelope;
pub mod framing;
pub mod message;
pub mod types;

mod error;

pub use envelope::{EnvelopeKind, RoutingEnvelope};
pub use error::WireError;
pub use framing::{RequestFraming, RequestKind, RouterFraming};
pub use message::{Frame, FrameReader, FrameWriter, Message};
pub use types::{EndPointAddress, Route, RouteHierarchy, TransportAddress};
