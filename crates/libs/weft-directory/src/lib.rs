//! # weft-directory
//!
//! The replicated directories the weft fabric resolves against, both backed
//! by the coordination service:
//!
//! - [`RouteMap`]: logical end-point name to live transport addresses, one
//!   ephemeral entry per registered replica under
//!   `/maps/<end-point>/<session>`.
//! - [`RouteManager`]: route key to [`RouteTarget`]s under
//!   `/routes/<route>/<entry>`, with a per-session reverse index under
//!   `/reverse-routes/<session>/<end-point>/<route>` so a closing process can
//!   take down exactly its own registrations.
//!
//! Arbitrary-UTF-8 names are base64url-encoded into path segments; entry
//! payloads are msgpack.

mod error;
mod options;
mod route_map;
mod route_manager;

pub use error::DirectoryError;
pub use options::{RouteRegistrationOptions, RouteTarget};
pub use route_map::RouteMap;
pub use route_manager::RouteManager;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

pub(crate) fn encode_segment(raw: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(raw)
}
