//! Nodes of the directory tree.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::common::Path;
use crate::lock::NodeLock;
use crate::storage::Replica;

/// Whether a node names a file or a directory. Fixed at creation: a file
/// never becomes an implicit directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// One entry in the directory tree.
///
/// Nodes are owned by their parent's child map and carry a weak
/// back-reference, so the root owns the whole graph. The mutable metadata
/// lives behind a short-section mutex; the reader/writer lock state has its
/// own coordination primitive in [`NodeLock`].
pub struct DirectoryNode {
    name: String,
    path: Path,
    kind: NodeKind,
    parent: Weak<DirectoryNode>,
    state: Mutex<NodeState>,
    lock: NodeLock,
}

/// Children for directories; the replica list, live prefix, and read-hit
/// counter for files. A directory keeps the registration placeholder replica
/// used when placing new children under it.
struct NodeState {
    children: HashMap<String, Arc<DirectoryNode>>,
    replicas: Vec<Replica>,
    live_replicas: usize,
    read_hits: u64,
}

impl DirectoryNode {
    pub(crate) fn new_root() -> Arc<DirectoryNode> {
        Arc::new(DirectoryNode {
            name: String::new(),
            path: Path::root(),
            kind: NodeKind::Directory,
            parent: Weak::new(),
            state: Mutex::new(NodeState {
                children: HashMap::new(),
                replicas: Vec::new(),
                live_replicas: 0,
                read_hits: 0,
            }),
            lock: NodeLock::new(),
        })
    }

    pub(crate) fn new_child(
        parent: &Arc<DirectoryNode>,
        name: &str,
        kind: NodeKind,
        replica: Replica,
    ) -> Arc<DirectoryNode> {
        Arc::new(DirectoryNode {
            name: name.to_string(),
            path: parent.path.child(name),
            kind,
            parent: Arc::downgrade(parent),
            state: Mutex::new(NodeState {
                children: HashMap::new(),
                replicas: vec![replica],
                live_replicas: 1,
                read_hits: 0,
            }),
            lock: NodeLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn parent(&self) -> Option<Arc<DirectoryNode>> {
        self.parent.upgrade()
    }

    pub(crate) fn lock(&self) -> &NodeLock {
        &self.lock
    }

    /// The nodes from the root down to this node, inclusive.
    pub fn ancestor_chain(self: &Arc<Self>) -> Vec<Arc<DirectoryNode>> {
        let mut chain = vec![self.clone()];
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            chain.push(node);
        }
        chain.reverse();
        chain
    }

    pub fn child(&self, name: &str) -> Option<Arc<DirectoryNode>> {
        self.state.lock().children.get(name).cloned()
    }

    pub fn child_names(&self) -> Vec<String> {
        self.state.lock().children.keys().cloned().collect()
    }

    pub(crate) fn add_child(&self, child: Arc<DirectoryNode>) {
        self.state.lock().children.insert(child.name.clone(), child);
    }

    pub(crate) fn remove_child(&self, name: &str) {
        self.state.lock().children.remove(name);
    }

    /// Every file node in the subtree rooted here, this node included.
    pub fn collect_files(self: &Arc<Self>) -> Vec<Arc<DirectoryNode>> {
        let mut files = Vec::new();
        self.collect_files_into(&mut files);
        files
    }

    fn collect_files_into(self: &Arc<Self>, out: &mut Vec<Arc<DirectoryNode>>) {
        if self.is_file() {
            out.push(self.clone());
            return;
        }
        let children: Vec<_> = self.state.lock().children.values().cloned().collect();
        for child in children {
            child.collect_files_into(out);
        }
    }

    pub fn replicas(&self) -> Vec<Replica> {
        self.state.lock().replicas.clone()
    }

    pub fn replica_count(&self) -> usize {
        self.state.lock().replicas.len()
    }

    pub fn live_replica_count(&self) -> usize {
        self.state.lock().live_replicas
    }

    /// The authoritative replicas, i.e. the live prefix of the replica list.
    pub fn live_replicas(&self) -> Vec<Replica> {
        let state = self.state.lock();
        state.replicas[..state.live_replicas].to_vec()
    }

    /// Records another server holding this node. Duplicates by storage
    /// identity are dropped.
    pub fn add_replica(&self, replica: Replica) {
        let mut state = self.state.lock();
        if state.replicas.iter().any(|held| held.storage == replica.storage) {
            return;
        }
        let fully_live = state.live_replicas == state.replicas.len();
        state.replicas.push(replica);
        if fully_live {
            state.live_replicas += 1;
        }
    }

    /// Counts a successful shared-lock acquisition. Returns true when the
    /// read count crosses `threshold`, resetting the counter.
    pub(crate) fn note_read_hit(&self, threshold: u64) -> bool {
        let mut state = self.state.lock();
        state.read_hits += 1;
        if state.read_hits >= threshold {
            state.read_hits = 0;
            true
        } else {
            false
        }
    }

    /// Shrinks the authoritative set to the first replica, returning the
    /// stale remainder. The replica list itself is retained so the stale
    /// copies can be restored later.
    pub(crate) fn begin_invalidate(&self) -> Vec<Replica> {
        let mut state = self.state.lock();
        if state.live_replicas <= 1 {
            return Vec::new();
        }
        let stale = state.replicas[1..].to_vec();
        state.live_replicas = 1;
        stale
    }

    /// Returns `(live, stale)` when stale replicas need re-materialising.
    pub(crate) fn restore_plan(&self) -> Option<(Vec<Replica>, Vec<Replica>)> {
        let state = self.state.lock();
        if state.live_replicas >= state.replicas.len() {
            return None;
        }
        Some((
            state.replicas[..state.live_replicas].to_vec(),
            state.replicas[state.live_replicas..].to_vec(),
        ))
    }

    pub(crate) fn mark_fully_live(&self) {
        let mut state = self.state.lock();
        state.live_replicas = state.replicas.len();
    }
}
