use async_trait::async_trait;
use tokio::sync::watch;

use crate::{CoordError, CoordPath, CreateMode, SessionId};

/// The external coordination service the directory layers are built on.
///
/// A tree of byte-valued paths. Ephemeral nodes are bound to the creating
/// session and vanish when it ends. Implementations that reconnect publish
/// under a fresh session and surface the change through
/// [`CoordinationService::watch_session`] so clients re-publish their
/// session-scoped state.
///
/// Contract details the directory layers rely on:
///
/// - Missing intermediate nodes are created implicitly as empty persistent
///   nodes.
/// - Deleting an absent path is not an error.
/// - Non-recursive deletion of a node with children fails with
///   [`CoordError::NotEmpty`].
#[async_trait]
pub trait CoordinationService: Send + Sync + 'static {
    /// Creates a node. Fails with [`CoordError::AlreadyExists`] if present.
    async fn create(
        &self,
        path: &CoordPath,
        value: &[u8],
        mode: CreateMode,
    ) -> Result<(), CoordError>;

    /// Creates a node, or returns the existing node's value unchanged.
    async fn get_or_create(
        &self,
        path: &CoordPath,
        value: &[u8],
        mode: CreateMode,
    ) -> Result<Vec<u8>, CoordError>;

    /// Deletes a node, and its subtree when `recursive`.
    async fn delete(&self, path: &CoordPath, recursive: bool) -> Result<(), CoordError>;

    /// The node's value, or `None` when absent.
    async fn get(&self, path: &CoordPath) -> Result<Option<Vec<u8>>, CoordError>;

    /// Names of the node's direct children. An absent node has none.
    async fn children(&self, path: &CoordPath) -> Result<Vec<String>, CoordError>;

    /// The current session identity.
    async fn session(&self) -> Result<SessionId, CoordError>;

    /// Watches the session identity; a new value means the previous session
    /// ended and its ephemeral nodes are gone.
    fn watch_session(&self) -> watch::Receiver<SessionId>;
}
