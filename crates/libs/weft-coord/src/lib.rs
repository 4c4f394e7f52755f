//! # weft-coord
//!
//! Boundary trait for the external coordination service the weft directory
//! layers sit on: a tree of byte-valued paths with session-scoped ephemeral
//! entries, in the shape of ZooKeeper.
//!
//! The fabric consumes the service verbatim through [`CoordinationService`];
//! [`MemoryCoordinationService`] is a complete in-process implementation with
//! deterministic session expiry, serving both tests and single-process
//! deployments.

mod error;
mod memory;
mod service;
mod types;

pub use error::CoordError;
pub use memory::MemoryCoordinationService;
pub use service::CoordinationService;
pub use types::{CoordPath, CreateMode, SessionId};
