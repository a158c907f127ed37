//! The naming server core: the public facade over the directory tree, the
//! hierarchical lock manager, and the replication controller.
//!
//! The naming server maintains the filesystem directory tree but stores no
//! file data; its job is to map each path to the storage servers hosting the
//! file's contents, and to serialise concurrent access through path-scoped
//! locks.

use std::sync::{Arc, Weak};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::common::{Error, NamingConfig, Path, Result};
use crate::lock::{LockManager, LockMode};
use crate::replication::ReplicationController;
use crate::storage::{pick_random, CommandStub, Replica, StorageRegistry, StorageStub};
use crate::tree::{DirectoryNode, DirectoryTree, NodeKind};

pub struct NamingServer {
    core: Arc<NamingCore>,
}

pub(crate) struct NamingCore {
    tree: DirectoryTree,
    registry: StorageRegistry,
    locks: LockManager,
    replicator: ReplicationController,
    config: NamingConfig,
}

impl NamingServer {
    /// Builds the naming core and spawns its replication workers, so this
    /// must run inside a tokio runtime.
    pub fn new(config: NamingConfig) -> Self {
        let core = Arc::new_cyclic(|weak: &Weak<NamingCore>| NamingCore {
            tree: DirectoryTree::new(),
            registry: StorageRegistry::new(),
            locks: LockManager::new(),
            replicator: ReplicationController::spawn(weak.clone(), &config),
            config,
        });
        Self { core }
    }

    /// Locks `path` for shared or exclusive access, taking every ancestor in
    /// shared mode first. Shared acquisitions on files feed the replication
    /// trigger; an exclusive acquisition on a replicated file invalidates
    /// every copy beyond the first.
    pub async fn lock(&self, path: &Path, exclusive: bool) -> Result<()> {
        self.core.lock(path, mode_of(exclusive)).await
    }

    /// Releases a lock taken with [`lock`](Self::lock). Stale replicas of a
    /// write-locked file are restored before any lock is given up.
    pub async fn unlock(&self, path: &Path, exclusive: bool) -> Result<()> {
        self.core.unlock(path, mode_of(exclusive)).await
    }

    /// True iff `path` names a directory; the root always does.
    pub fn is_directory(&self, path: &Path) -> Result<bool> {
        let node = self.core.find(path)?;
        Ok(node.is_directory())
    }

    /// The child names of a directory.
    pub fn list(&self, path: &Path) -> Result<Vec<String>> {
        let node = self.core.find(path)?;
        if node.is_file() {
            return Err(Error::PathNotFound(format!("{path} is not a directory")));
        }
        let mut names = node.child_names();
        names.sort();
        Ok(names)
    }

    /// Creates a file on one storage server, chosen from the parent's
    /// replica set when it has one. Returns false if the path already
    /// exists or is the root.
    pub async fn create_file(&self, path: &Path) -> Result<bool> {
        self.core.create(path, NodeKind::File).await
    }

    /// Creates a directory. Purely a metadata operation: no storage server
    /// is contacted.
    pub async fn create_directory(&self, path: &Path) -> Result<bool> {
        self.core.create(path, NodeKind::Directory).await
    }

    /// Deletes the subtree at `path`, commanding every replica of every file
    /// in it to drop its bytes. Returns false for the root.
    pub async fn delete(&self, path: &Path) -> Result<bool> {
        self.core.delete(path).await
    }

    /// A storage server currently hosting `file`, chosen uniformly at random
    /// from its live replicas.
    pub fn get_storage(&self, path: &Path) -> Result<StorageStub> {
        let node = self.core.find(path)?;
        if node.is_directory() {
            return Err(Error::PathNotFound(format!("{path} is a directory")));
        }
        pick_random(&node.live_replicas())
            .map(|replica| replica.storage)
            .ok_or_else(|| Error::InvalidState(format!("{path} has no live replica")))
    }

    /// Merges a storage server's file inventory into the tree, returning the
    /// duplicates the server must discard locally. Serialised with all other
    /// tree mutations by an exclusive lock on the root.
    pub async fn register(
        &self,
        storage: StorageStub,
        command: CommandStub,
        files: Vec<Path>,
    ) -> Result<Vec<Path>> {
        self.core.register(storage, command, files).await
    }

    /// Resolves once the replication queue has drained. Used on shutdown.
    pub async fn quiesce_replication(&self) {
        self.core.replicator.wait_idle().await;
    }

    /// Stops the naming core: every blocked lock acquisition fails with
    /// `Interrupted`, as do new ones. The server should not be used
    /// afterwards.
    pub fn stop(&self) {
        self.core.locks.interrupt_all();
    }
}

impl NamingCore {
    /// Looks up the node at exactly `path`.
    fn find(&self, path: &Path) -> Result<Arc<DirectoryNode>> {
        self.tree
            .lookup_exact(path)
            .ok_or_else(|| Error::PathNotFound(path.to_string()))
    }

    async fn lock(&self, path: &Path, mode: LockMode) -> Result<()> {
        let node = self.find(path)?;
        let chain = node.ancestor_chain();
        self.locks.lock(&chain, mode).await?;

        if node.is_file() {
            match mode {
                LockMode::Shared => {
                    if node.note_read_hit(self.config.replica_threshold) {
                        debug!(%path, "read threshold crossed, scheduling replica grow");
                        self.replicator.schedule(path.clone());
                    }
                }
                LockMode::Exclusive => self.invalidate_stale(&node).await,
            }
        }
        Ok(())
    }

    async fn unlock(&self, path: &Path, mode: LockMode) -> Result<()> {
        let node = self
            .tree
            .lookup_exact(path)
            .ok_or_else(|| Error::InvalidArgument(format!("cannot unlock unknown path {path}")))?;
        // validate before the replica restore: a caller that does not hold
        // the lock must fail with no side effects
        if !node.lock().held(mode) {
            let mode_name = match mode {
                LockMode::Exclusive => "exclusive",
                LockMode::Shared => "shared",
            };
            return Err(Error::InvalidArgument(format!(
                "{path} is not locked for {mode_name} access"
            )));
        }
        if mode == LockMode::Exclusive && node.is_file() {
            self.restore_replicas(&node).await;
        }
        let chain = node.ancestor_chain();
        self.locks.unlock(&chain, mode)
    }

    /// Tells every replica beyond the first to drop its copy. The replica
    /// list is retained so the copies can be restored on release.
    async fn invalidate_stale(&self, node: &Arc<DirectoryNode>) {
        let stale = node.begin_invalidate();
        if stale.is_empty() {
            return;
        }
        let path = node.path();
        let results = join_all(stale.into_iter().map(|replica| async move {
            let server = replica.command.endpoint().to_string();
            (server, replica.command.delete(path).await)
        }))
        .await;
        for (server, result) in results {
            if let Err(e) = result {
                warn!(%path, server = %server, error = %e, "stale replica invalidation failed");
            }
        }
    }

    /// Re-materialises stale replicas from randomly chosen live ones, then
    /// marks the whole list authoritative again.
    async fn restore_replicas(&self, node: &Arc<DirectoryNode>) {
        let Some((live, stale)) = node.restore_plan() else {
            return;
        };
        let path = node.path();
        for replica in stale {
            let Some(source) = pick_random(&live) else {
                break;
            };
            match replica.command.copy(path, &source.storage).await {
                Ok(true) => {
                    debug!(%path, target = replica.storage.endpoint(), "restored replica")
                }
                Ok(false) => {
                    warn!(%path, target = replica.storage.endpoint(), "replica restore refused")
                }
                Err(e) => {
                    warn!(%path, target = replica.storage.endpoint(), error = %e, "replica restore failed")
                }
            }
        }
        node.mark_fully_live();
    }

    /// One replication job: grow `path` by one replica, under a shared lock.
    pub(crate) async fn grow_replica(&self, path: &Path) -> Result<()> {
        let node = self.find(path)?;
        if !node.is_file() {
            return Ok(());
        }
        let chain = node.ancestor_chain();
        self.locks.lock(&chain, LockMode::Shared).await?;
        let result = self.grow_locked(&node).await;
        self.locks.unlock(&chain, LockMode::Shared)?;
        result
    }

    async fn grow_locked(&self, node: &Arc<DirectoryNode>) -> Result<()> {
        let spares = self.registry.spares(&node.replicas());
        let Some(target) = pick_random(&spares) else {
            debug!(path = %node.path(), "fully replicated");
            return Ok(());
        };
        let Some(source) = pick_random(&node.live_replicas()) else {
            return Ok(());
        };
        if target.command.copy(node.path(), &source.storage).await? {
            node.add_replica(target.clone());
            info!(
                path = %node.path(),
                target = target.storage.endpoint(),
                source = source.storage.endpoint(),
                "grew replica"
            );
        }
        Ok(())
    }

    async fn create(&self, path: &Path, kind: NodeKind) -> Result<bool> {
        if path.is_root() {
            return Ok(false);
        }
        if self.registry.is_empty() {
            return Err(Error::InvalidState("no storage servers registered".to_string()));
        }
        let parent_path = path.parent()?;
        let parent = self
            .tree
            .lookup_exact(&parent_path)
            .filter(|node| node.is_directory())
            .ok_or_else(|| {
                Error::PathNotFound(format!("parent of {path} does not exist or is a file"))
            })?;

        self.lock(&parent_path, LockMode::Exclusive).await?;
        let result = self.create_locked(&parent, path, kind).await;
        self.unlock(&parent_path, LockMode::Exclusive).await?;
        result
    }

    async fn create_locked(
        &self,
        parent: &Arc<DirectoryNode>,
        path: &Path,
        kind: NodeKind,
    ) -> Result<bool> {
        if self.tree.lookup(path).is_some() {
            return Ok(false);
        }

        let pool = parent.replicas();
        let replica = if pool.is_empty() { self.registry.pick_random() } else { pick_random(&pool) };
        let Some(replica) = replica else {
            return Err(Error::InvalidState("no storage servers registered".to_string()));
        };

        if !self.tree.insert(path, &replica, kind == NodeKind::Directory) {
            return Ok(false);
        }
        if kind == NodeKind::File {
            if let Err(e) = replica.command.create(path).await {
                warn!(%path, server = replica.command.endpoint(), error = %e,
                    "create on storage server failed, rolling back");
                self.tree.unlink(path);
                return Err(e);
            }
        }
        debug!(%path, ?kind, server = replica.storage.endpoint(), "created");
        Ok(true)
    }

    async fn delete(&self, path: &Path) -> Result<bool> {
        if path.is_root() {
            return Ok(false);
        }
        self.find(path)?;
        let parent_path = path.parent()?;

        self.lock(&parent_path, LockMode::Exclusive).await?;
        // the path may have vanished while we waited for the parent
        let deleted = match self.tree.lookup_exact(path) {
            Some(node) => {
                self.tree.remove(&node).await;
                true
            }
            None => false,
        };
        self.unlock(&parent_path, LockMode::Exclusive).await?;
        Ok(deleted)
    }

    async fn register(
        &self,
        storage: StorageStub,
        command: CommandStub,
        files: Vec<Path>,
    ) -> Result<Vec<Path>> {
        if storage.endpoint().is_empty() || command.endpoint().is_empty() {
            return Err(Error::InvalidArgument(
                "storage and command endpoints are required".to_string(),
            ));
        }

        let root_chain = vec![self.tree.root()];
        self.locks.lock(&root_chain, LockMode::Exclusive).await?;

        if self.registry.contains(&storage) {
            self.locks.unlock(&root_chain, LockMode::Exclusive)?;
            return Err(Error::AlreadyRegistered(storage.endpoint().to_string()));
        }

        let replica = Replica { storage, command };
        let duplicates = self.tree.merge_register(&files, &replica);
        self.registry.add(replica.clone());
        self.locks.unlock(&root_chain, LockMode::Exclusive)?;

        info!(
            server = replica.storage.endpoint(),
            files = files.len(),
            duplicates = duplicates.len(),
            "registered storage server"
        );
        Ok(duplicates)
    }
}

fn mode_of(exclusive: bool) -> LockMode {
    if exclusive {
        LockMode::Exclusive
    } else {
        LockMode::Shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fake::fake_pair;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    fn server() -> NamingServer {
        NamingServer::new(NamingConfig::default())
    }

    #[tokio::test]
    async fn test_register_builds_tree_and_resolves_storage() {
        let naming = server();
        let (_a, replica) = fake_pair("a");
        let duplicates = naming
            .register(replica.storage.clone(), replica.command.clone(), vec![p("/a"), p("/a/b")])
            .await
            .unwrap();
        assert!(duplicates.is_empty());

        assert_eq!(naming.list(&p("/")).unwrap(), vec!["a"]);
        assert_eq!(naming.list(&p("/a")).unwrap(), vec!["b"]);
        assert!(naming.is_directory(&p("/a")).unwrap());
        assert!(!naming.is_directory(&p("/a/b")).unwrap());
        assert!(naming.is_directory(&p("/")).unwrap());
        assert_eq!(
            naming.get_storage(&p("/a/b")).unwrap().endpoint(),
            replica.storage.endpoint()
        );
    }

    #[tokio::test]
    async fn test_duplicate_register_reports_existing_files() {
        let naming = server();
        let (_a, replica_a) = fake_pair("a");
        let (_b, replica_b) = fake_pair("b");

        naming
            .register(replica_a.storage.clone(), replica_a.command.clone(), vec![p("/x")])
            .await
            .unwrap();
        let duplicates = naming
            .register(replica_b.storage.clone(), replica_b.command.clone(), vec![p("/x")])
            .await
            .unwrap();

        assert_eq!(duplicates, vec![p("/x")]);
        let node = naming.core.tree.lookup_exact(&p("/x")).unwrap();
        assert_eq!(node.replica_count(), 1);
        assert_eq!(
            naming.get_storage(&p("/x")).unwrap().endpoint(),
            replica_a.storage.endpoint()
        );
    }

    #[tokio::test]
    async fn test_reregistering_a_server_is_rejected() {
        let naming = server();
        let (_a, replica) = fake_pair("a");
        naming
            .register(replica.storage.clone(), replica.command.clone(), vec![])
            .await
            .unwrap();
        let result = naming
            .register(replica.storage.clone(), replica.command.clone(), vec![])
            .await;
        assert!(matches!(result, Err(Error::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_read_threshold_grows_replica() {
        let naming = server();
        let (_a, replica_a) = fake_pair("a");
        let (b, replica_b) = fake_pair("b");
        naming
            .register(replica_a.storage.clone(), replica_a.command.clone(), vec![p("/x")])
            .await
            .unwrap();
        naming
            .register(replica_b.storage.clone(), replica_b.command.clone(), vec![])
            .await
            .unwrap();

        for _ in 0..3 {
            naming.lock(&p("/x"), false).await.unwrap();
            naming.unlock(&p("/x"), false).await.unwrap();
        }
        naming.quiesce_replication().await;

        let node = naming.core.tree.lookup_exact(&p("/x")).unwrap();
        assert_eq!(node.replica_count(), 2);
        assert_eq!(node.live_replica_count(), 2);
        assert_eq!(b.copies(), vec![(p("/x"), replica_a.storage.endpoint().to_string())]);
    }

    #[tokio::test]
    async fn test_replication_stops_at_server_count() {
        let naming = server();
        let (_a, replica_a) = fake_pair("a");
        naming
            .register(replica_a.storage.clone(), replica_a.command.clone(), vec![p("/x")])
            .await
            .unwrap();

        for _ in 0..6 {
            naming.lock(&p("/x"), false).await.unwrap();
            naming.unlock(&p("/x"), false).await.unwrap();
        }
        naming.quiesce_replication().await;

        let node = naming.core.tree.lookup_exact(&p("/x")).unwrap();
        assert_eq!(node.replica_count(), 1);
    }

    #[tokio::test]
    async fn test_writer_invalidates_and_restores_replicas() {
        let naming = server();
        let (_a, replica_a) = fake_pair("a");
        let (b, replica_b) = fake_pair("b");
        naming
            .register(replica_a.storage.clone(), replica_a.command.clone(), vec![p("/x")])
            .await
            .unwrap();
        naming
            .register(replica_b.storage.clone(), replica_b.command.clone(), vec![])
            .await
            .unwrap();
        let node = naming.core.tree.lookup_exact(&p("/x")).unwrap();
        node.add_replica(replica_b.clone());
        assert_eq!(node.live_replica_count(), 2);

        naming.lock(&p("/x"), true).await.unwrap();
        assert_eq!(node.live_replica_count(), 1);
        assert_eq!(node.replica_count(), 2);
        assert_eq!(b.deleted_paths(), vec![p("/x")]);

        naming.unlock(&p("/x"), true).await.unwrap();
        assert_eq!(node.live_replica_count(), 2);
        assert_eq!(b.copies(), vec![(p("/x"), replica_a.storage.endpoint().to_string())]);
    }

    #[tokio::test]
    async fn test_create_file_places_and_commands_a_server() {
        let naming = server();
        let (a, replica) = fake_pair("a");
        naming
            .register(replica.storage.clone(), replica.command.clone(), vec![])
            .await
            .unwrap();

        assert!(naming.create_file(&p("/f")).await.unwrap());
        assert!(!naming.create_file(&p("/f")).await.unwrap());
        assert_eq!(a.created_paths(), vec![p("/f")]);
        assert!(!naming.is_directory(&p("/f")).unwrap());
        assert_eq!(naming.get_storage(&p("/f")).unwrap().endpoint(), replica.storage.endpoint());
    }

    #[tokio::test]
    async fn test_create_under_missing_parent_fails() {
        let naming = server();
        let (_a, replica) = fake_pair("a");
        naming
            .register(replica.storage.clone(), replica.command.clone(), vec![p("/f")])
            .await
            .unwrap();

        assert!(matches!(
            naming.create_file(&p("/d/x")).await,
            Err(Error::PathNotFound(_))
        ));
        // a file is not a directory either
        assert!(matches!(
            naming.create_file(&p("/f/x")).await,
            Err(Error::PathNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_without_servers_is_invalid_state() {
        let naming = server();
        assert!(matches!(
            naming.create_file(&p("/x")).await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            naming.create_directory(&p("/d")).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_create_root_returns_false() {
        let naming = server();
        let (_a, replica) = fake_pair("a");
        naming
            .register(replica.storage.clone(), replica.command.clone(), vec![])
            .await
            .unwrap();
        assert!(!naming.create_file(&p("/")).await.unwrap());
        assert!(!naming.create_directory(&p("/")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_cascades_to_storage_servers() {
        let naming = server();
        let (a, replica) = fake_pair("a");
        naming
            .register(replica.storage.clone(), replica.command.clone(), vec![])
            .await
            .unwrap();
        assert!(naming.create_directory(&p("/d")).await.unwrap());
        assert!(naming.create_directory(&p("/d/e")).await.unwrap());
        assert!(naming.create_file(&p("/d/e/f")).await.unwrap());

        assert!(naming.delete(&p("/d")).await.unwrap());
        assert!(naming.list(&p("/")).unwrap().is_empty());
        assert_eq!(a.deleted_paths(), vec![p("/d/e/f")]);
        assert!(matches!(naming.delete(&p("/d")).await, Err(Error::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_root_returns_false() {
        let naming = server();
        assert!(!naming.delete(&p("/")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_on_file_or_missing_path_fails() {
        let naming = server();
        let (_a, replica) = fake_pair("a");
        naming
            .register(replica.storage.clone(), replica.command.clone(), vec![p("/f")])
            .await
            .unwrap();
        assert!(matches!(naming.list(&p("/f")), Err(Error::PathNotFound(_))));
        assert!(matches!(naming.list(&p("/missing")), Err(Error::PathNotFound(_))));
        assert!(matches!(naming.is_directory(&p("/missing")), Err(Error::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_get_storage_rejects_directories() {
        let naming = server();
        let (_a, replica) = fake_pair("a");
        naming
            .register(replica.storage.clone(), replica.command.clone(), vec![p("/d/f")])
            .await
            .unwrap();
        assert!(matches!(naming.get_storage(&p("/d")), Err(Error::PathNotFound(_))));
        assert!(matches!(naming.get_storage(&p("/missing")), Err(Error::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_unlock_without_lock_is_invalid_argument() {
        let naming = server();
        let (_a, replica) = fake_pair("a");
        naming
            .register(replica.storage.clone(), replica.command.clone(), vec![p("/x")])
            .await
            .unwrap();
        assert!(matches!(
            naming.unlock(&p("/x"), false).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            naming.unlock(&p("/missing"), false).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_missing_path_is_not_found() {
        let naming = server();
        assert!(matches!(
            naming.lock(&p("/missing"), false).await,
            Err(Error::PathNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unlock_by_non_holder_restores_nothing() {
        let naming = server();
        let (_a, replica_a) = fake_pair("a");
        let (b, replica_b) = fake_pair("b");
        naming
            .register(replica_a.storage.clone(), replica_a.command.clone(), vec![p("/x")])
            .await
            .unwrap();
        naming
            .register(replica_b.storage.clone(), replica_b.command.clone(), vec![])
            .await
            .unwrap();
        let node = naming.core.tree.lookup_exact(&p("/x")).unwrap();
        node.add_replica(replica_b.clone());
        // stale copies exist but nobody holds the exclusive lock
        node.begin_invalidate();

        let result = naming.unlock(&p("/x"), true).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(b.copies().is_empty());
        assert_eq!(node.live_replica_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_interrupts_blocked_lock_requests() {
        let naming = Arc::new(server());
        let (_a, replica) = fake_pair("a");
        naming
            .register(replica.storage.clone(), replica.command.clone(), vec![p("/x")])
            .await
            .unwrap();
        naming.lock(&p("/x"), true).await.unwrap();

        let blocked = tokio::spawn({
            let naming = naming.clone();
            async move { naming.lock(&p("/x"), false).await }
        });
        sleep(Duration::from_millis(50)).await;

        naming.stop();
        let result = timeout(Duration::from_secs(1), blocked).await.unwrap().unwrap();
        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(matches!(naming.lock(&p("/x"), false).await, Err(Error::Interrupted)));
    }
}
