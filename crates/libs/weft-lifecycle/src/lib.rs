//! # weft-lifecycle
//!
//! Lifecycle primitives shared by every weft component that owns background
//! work:
//!
//! - [`Completion`]: a one-shot completion signal, used for the
//!   `initialization` and `disposal` events a component exposes.
//! - [`DisposalGate`] / [`DisposalGuard`]: scoped guards acquired around
//!   public operations; disposal waits for outstanding guards and acquiring
//!   on a disposed component fails with [`Disposed`].
//! - [`LinkedCancellation`]: composes an external cancellation with a
//!   component's disposal token so inner code cannot tell them apart.

mod cancel;
mod completion;
mod gate;

pub use cancel::{linked, LinkedCancellation};
pub use completion::Completion;
pub use gate::{Disposed, DisposalGate, DisposalGuard};
