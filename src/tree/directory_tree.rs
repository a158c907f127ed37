//! The in-memory directory tree of the naming server.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::warn;

use crate::common::Path;
use crate::storage::Replica;

use super::node::{DirectoryNode, NodeKind};

/// Trie from paths to nodes. Structural mutations are serialised by a coarse
/// mutex; they are short and already guarded by parental exclusive locks at
/// the semantic level. Remote deletes issued during [`DirectoryTree::remove`]
/// run with no tree mutex held.
pub struct DirectoryTree {
    root: Arc<DirectoryNode>,
    structural: Mutex<()>,
}

impl DirectoryTree {
    pub fn new() -> Self {
        Self { root: DirectoryNode::new_root(), structural: Mutex::new(()) }
    }

    pub fn root(&self) -> Arc<DirectoryNode> {
        self.root.clone()
    }

    /// Walks from the root toward `path`. Stops early and returns the file
    /// node if an intermediate component names a file, so callers can reject
    /// the rest of the path; returns `None` if a component is missing.
    pub fn lookup(&self, path: &Path) -> Option<Arc<DirectoryNode>> {
        let mut node = self.root.clone();
        for component in path.components() {
            node = node.child(component)?;
            if node.is_file() {
                return Some(node);
            }
        }
        Some(node)
    }

    /// Like [`lookup`](Self::lookup), but only for the node at exactly
    /// `path`.
    pub fn lookup_exact(&self, path: &Path) -> Option<Arc<DirectoryNode>> {
        self.lookup(path).filter(|node| node.path() == path)
    }

    /// Inserts `path`, creating missing intermediate directories along the
    /// chain; the leaf becomes a file iff `as_directory` is false. An
    /// existing leaf has the stub pair added to its replicas instead.
    ///
    /// Returns false, with the tree unchanged, when an existing file blocks
    /// the chain.
    pub fn insert(&self, path: &Path, replica: &Replica, as_directory: bool) -> bool {
        let _guard = self.structural.lock();
        let count = path.component_count();
        let mut node = self.root.clone();
        for (i, component) in path.components().enumerate() {
            let last = i + 1 == count;
            match node.child(component) {
                Some(child) => {
                    if child.is_file() && !last {
                        return false;
                    }
                    if last {
                        child.add_replica(replica.clone());
                    }
                    node = child;
                }
                None => {
                    let kind = if last && !as_directory {
                        NodeKind::File
                    } else {
                        NodeKind::Directory
                    };
                    let child = DirectoryNode::new_child(&node, component, kind, replica.clone());
                    node.add_child(child.clone());
                    node = child;
                }
            }
        }
        true
    }

    /// Removes the subtree rooted at `node`, commanding every replica of
    /// every file in it to drop its bytes. Remote failures are logged and do
    /// not stop the propagation; the metadata unlink always happens.
    pub async fn remove(&self, node: &Arc<DirectoryNode>) {
        let files = {
            let _guard = self.structural.lock();
            node.collect_files()
        };
        for file in &files {
            let path = file.path().clone();
            let results = join_all(file.replicas().into_iter().map(|replica| {
                let path = path.clone();
                async move {
                    let server = replica.command.endpoint().to_string();
                    (server, replica.command.delete(&path).await)
                }
            }))
            .await;
            for (server, result) in results {
                if let Err(e) = result {
                    warn!(path = %path, server = %server, error = %e, "remote delete failed");
                }
            }
        }
        let _guard = self.structural.lock();
        if let Some(parent) = node.parent() {
            parent.remove_child(node.name());
        }
    }

    /// Unlinks the node at `path` without touching storage servers. Used to
    /// roll back a metadata insertion whose primary create failed.
    pub fn unlink(&self, path: &Path) {
        let _guard = self.structural.lock();
        if let Some(node) = self.lookup(path).filter(|node| node.path() == path) {
            if let Some(parent) = node.parent() {
                parent.remove_child(node.name());
            }
        }
    }

    /// Merges a registering server's file inventory into the tree. Paths
    /// already present as files (or blocked by one) are returned as
    /// duplicates for the server to discard locally.
    ///
    /// Deeper paths merge first, so an inventory naming both a directory and
    /// entries beneath it resolves the shared prefix to a directory.
    pub fn merge_register(&self, files: &[Path], replica: &Replica) -> Vec<Path> {
        let mut ordered: Vec<&Path> = files.iter().collect();
        ordered.sort();
        ordered.reverse();

        let mut duplicates = Vec::new();
        for path in ordered {
            if path.is_root() {
                continue;
            }
            match self.lookup(path) {
                Some(node) if node.is_file() => duplicates.push(path.clone()),
                _ => {
                    if !self.insert(path, replica, false) {
                        duplicates.push(path.clone());
                    }
                }
            }
        }
        duplicates
    }
}

impl Default for DirectoryTree {
    fn default() -> Self {
        Self::new()
    }
}
