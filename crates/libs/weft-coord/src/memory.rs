//! In-process coordination service.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{CoordError, CoordPath, CoordinationService, CreateMode, SessionId};

#[derive(Debug, Clone)]
struct Node {
    value: Vec<u8>,
    owner: Option<SessionId>,
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<CoordPath, Node>,
    session: SessionId,
    session_seq: u64,
}

/// Complete in-process [`CoordinationService`].
///
/// Backs single-process deployments and every directory/fabric test.
/// [`MemoryCoordinationService::expire_session`] deterministically simulates
/// session loss: ephemeral nodes of the old session disappear and session
/// watchers observe the new identity.
#[derive(Debug)]
pub struct MemoryCoordinationService {
    state: Mutex<Tree>,
    session_tx: watch::Sender<SessionId>,
}

impl MemoryCoordinationService {
    pub fn new() -> Self {
        let session = SessionId::new("session-1");
        let (session_tx, _) = watch::channel(session.clone());
        Self {
            state: Mutex::new(Tree { nodes: BTreeMap::new(), session, session_seq: 1 }),
            session_tx,
        }
    }

    /// Ends the current session: drops its ephemeral nodes, installs a fresh
    /// session identity, and notifies session watchers.
    pub fn expire_session(&self) -> SessionId {
        let mut tree = self.lock();
        let expired = tree.session.clone();
        tree.nodes.retain(|_, node| node.owner.as_ref() != Some(&expired));
        tree.session_seq += 1;
        let session = SessionId::new(format!("session-{}", tree.session_seq));
        tree.session = session.clone();
        drop(tree);
        let _ = self.session_tx.send(session.clone());
        session
    }

    /// Number of stored nodes, intermediate nodes included.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tree> {
        match self.state.lock() {
            Ok(tree) => tree,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryCoordinationService {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_parents(tree: &mut Tree, path: &CoordPath) {
    let mut ancestors = Vec::new();
    let mut cursor = path.parent();
    while let Some(ancestor) = cursor {
        if ancestor.is_root() || tree.nodes.contains_key(&ancestor) {
            break;
        }
        cursor = ancestor.parent();
        ancestors.push(ancestor);
    }
    for ancestor in ancestors.into_iter().rev() {
        tree.nodes.insert(ancestor, Node { value: Vec::new(), owner: None });
    }
}

#[async_trait]
impl CoordinationService for MemoryCoordinationService {
    async fn create(
        &self,
        path: &CoordPath,
        value: &[u8],
        mode: CreateMode,
    ) -> Result<(), CoordError> {
        let mut tree = self.lock();
        if path.is_root() || tree.nodes.contains_key(path) {
            return Err(CoordError::AlreadyExists(path.to_string()));
        }
        ensure_parents(&mut tree, path);
        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(tree.session.clone()),
        };
        tree.nodes.insert(path.clone(), Node { value: value.to_vec(), owner });
        Ok(())
    }

    async fn get_or_create(
        &self,
        path: &CoordPath,
        value: &[u8],
        mode: CreateMode,
    ) -> Result<Vec<u8>, CoordError> {
        let mut tree = self.lock();
        if let Some(node) = tree.nodes.get(path) {
            return Ok(node.value.clone());
        }
        if path.is_root() {
            return Ok(Vec::new());
        }
        ensure_parents(&mut tree, path);
        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(tree.session.clone()),
        };
        tree.nodes.insert(path.clone(), Node { value: value.to_vec(), owner });
        Ok(value.to_vec())
    }

    async fn delete(&self, path: &CoordPath, recursive: bool) -> Result<(), CoordError> {
        let mut tree = self.lock();
        if !tree.nodes.contains_key(path) && !path.is_root() {
            return Ok(());
        }
        let has_children = tree
            .nodes
            .keys()
            .any(|key| key != path && key.starts_with(path));
        if has_children && !recursive {
            return Err(CoordError::NotEmpty(path.to_string()));
        }
        tree.nodes.retain(|key, _| !(key == path || key.starts_with(path)));
        Ok(())
    }

    async fn get(&self, path: &CoordPath) -> Result<Option<Vec<u8>>, CoordError> {
        Ok(self.lock().nodes.get(path).map(|node| node.value.clone()))
    }

    async fn children(&self, path: &CoordPath) -> Result<Vec<String>, CoordError> {
        let depth = path.segments().len() + 1;
        Ok(self
            .lock()
            .nodes
            .keys()
            .filter(|key| key.segments().len() == depth && key.starts_with(path))
            .filter_map(|key| key.name().map(str::to_owned))
            .collect())
    }

    async fn session(&self) -> Result<SessionId, CoordError> {
        Ok(self.lock().session.clone())
    }

    fn watch_session(&self) -> watch::Receiver<SessionId> {
        self.session_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> CoordPath {
        CoordPath::parse(raw).expect("valid path")
    }

    #[tokio::test]
    async fn create_then_get() {
        let coord = MemoryCoordinationService::new();
        coord
            .create(&path("/maps/orders/s1"), b"addr", CreateMode::Ephemeral)
            .await
            .expect("create");
        assert_eq!(
            coord.get(&path("/maps/orders/s1")).await.expect("get"),
            Some(b"addr".to_vec())
        );
        assert_eq!(coord.get(&path("/maps/other")).await.expect("get"), None);
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let coord = MemoryCoordinationService::new();
        coord.create(&path("/a"), b"1", CreateMode::Persistent).await.expect("create");
        assert!(matches!(
            coord.create(&path("/a"), b"2", CreateMode::Persistent).await,
            Err(CoordError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn get_or_create_keeps_existing_value() {
        let coord = MemoryCoordinationService::new();
        let first = coord
            .get_or_create(&path("/a"), b"first", CreateMode::Ephemeral)
            .await
            .expect("create");
        let second = coord
            .get_or_create(&path("/a"), b"second", CreateMode::Ephemeral)
            .await
            .expect("get");
        assert_eq!(first, b"first");
        assert_eq!(second, b"first");
    }

    #[tokio::test]
    async fn intermediate_nodes_appear_implicitly() {
        let coord = MemoryCoordinationService::new();
        coord
            .create(&path("/maps/orders/s1"), b"addr", CreateMode::Ephemeral)
            .await
            .expect("create");
        assert_eq!(coord.children(&path("/maps")).await.expect("children"), ["orders"]);
    }

    #[tokio::test]
    async fn children_lists_direct_descendants_sorted() {
        let coord = MemoryCoordinationService::new();
        for name in ["b", "a", "c"] {
            coord
                .create(&path("/routes").child(name).expect("segment"), b"", CreateMode::Persistent)
                .await
                .expect("create");
        }
        coord.create(&path("/routes/a/deep"), b"", CreateMode::Persistent).await.expect("create");
        assert_eq!(coord.children(&path("/routes")).await.expect("children"), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn delete_absent_is_not_an_error() {
        let coord = MemoryCoordinationService::new();
        coord.delete(&path("/missing"), false).await.expect("no-op");
    }

    #[tokio::test]
    async fn delete_with_children_requires_recursive() {
        let coord = MemoryCoordinationService::new();
        coord.create(&path("/a/b"), b"", CreateMode::Persistent).await.expect("create");
        assert!(matches!(
            coord.delete(&path("/a"), false).await,
            Err(CoordError::NotEmpty(_))
        ));
        coord.delete(&path("/a"), true).await.expect("recursive delete");
        assert_eq!(coord.node_count(), 0);
    }

    #[tokio::test]
    async fn session_expiry_drops_ephemerals_and_notifies() {
        let coord = MemoryCoordinationService::new();
        let mut watcher = coord.watch_session();
        let before = coord.session().await.expect("session");

        coord.create(&path("/e"), b"", CreateMode::Ephemeral).await.expect("create");
        coord.create(&path("/p"), b"", CreateMode::Persistent).await.expect("create");

        let after = coord.expire_session();
        assert_ne!(before, after);
        assert_eq!(coord.get(&path("/e")).await.expect("get"), None);
        assert_eq!(coord.get(&path("/p")).await.expect("get"), Some(Vec::new()));

        watcher.changed().await.expect("watch");
        assert_eq!(*watcher.borrow(), after);
        assert_eq!(coord.session().await.expect("session"), after);
    }

    #[tokio::test]
    async fn ephemerals_of_the_new_session_survive_old_expiry() {
        let coord = MemoryCoordinationService::new();
        coord.create(&path("/old"), b"", CreateMode::Ephemeral).await.expect("create");
        coord.expire_session();
        coord.create(&path("/new"), b"", CreateMode::Ephemeral).await.expect("create");
        assert_eq!(coord.get(&path("/old")).await.expect("get"), None);
        assert_eq!(coord.get(&path("/new")).await.expect("get"), Some(Vec::new()));

        coord.expire_session();
        assert_eq!(coord.get(&path("/new")).await.expect("get"), None);
    }
}
