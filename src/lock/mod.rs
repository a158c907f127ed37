//! Hierarchical reader/writer locks over the directory tree.
//!
//! Locking a path takes every strict ancestor in shared mode, top-down, and
//! the target in the requested mode; release mirrors in reverse. Each node
//! keeps its own holder counts and a FIFO queue of waiting requests, giving
//! writers preference over readers that arrive after them. All waiting
//! happens on single nodes, never chained, so no cyclic wait can form
//! between two live acquisitions.
//!
//! A blocked acquisition ends one of three ways: it is granted; its future
//! is dropped (the waiter token is removed and the node re-notified); or the
//! manager is interrupted on server stop, in which case the waiter cleans up
//! the same way and the caller gets [`Error::Interrupted`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::common::{Error, Result};
use crate::tree::DirectoryNode;

/// The two modes of the per-node lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Per-node lock state and its coordination primitive.
pub struct NodeLock {
    state: Mutex<LockState>,
    notify: Notify,
}

struct LockState {
    shared_holders: usize,
    exclusive_held: bool,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

#[derive(Clone, Copy)]
struct Waiter {
    ticket: u64,
    mode: LockMode,
}

impl LockState {
    /// Whether a request is compatible with the current holders, queue
    /// aside.
    fn compatible(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.exclusive_held,
            LockMode::Exclusive => !self.exclusive_held && self.shared_holders == 0,
        }
    }

    fn grant(&mut self, mode: LockMode) {
        match mode {
            LockMode::Shared => self.shared_holders += 1,
            LockMode::Exclusive => self.exclusive_held = true,
        }
    }

    fn position(&self, ticket: u64) -> Option<usize> {
        self.waiters.iter().position(|waiter| waiter.ticket == ticket)
    }

    /// A queued shared request is admissible once no writer holds the node
    /// and only shared requests are ahead of it, so a contiguous run of
    /// readers at the head is admitted together. A queued exclusive request
    /// is admissible only at the head of the queue with no holders at all.
    fn admissible(&self, ticket: u64, mode: LockMode) -> bool {
        let Some(position) = self.position(ticket) else {
            return false;
        };
        match mode {
            LockMode::Shared => {
                !self.exclusive_held
                    && self
                        .waiters
                        .iter()
                        .take(position)
                        .all(|waiter| waiter.mode == LockMode::Shared)
            }
            LockMode::Exclusive => position == 0 && self.compatible(LockMode::Exclusive),
        }
    }

    fn remove(&mut self, ticket: u64) {
        if let Some(position) = self.position(ticket) {
            self.waiters.remove(position);
        }
    }
}

impl NodeLock {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                shared_holders: 0,
                exclusive_held: false,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Whether the node is currently held in `mode`.
    pub(crate) fn held(&self, mode: LockMode) -> bool {
        let state = self.state.lock();
        match mode {
            LockMode::Exclusive => state.exclusive_held,
            LockMode::Shared => state.shared_holders > 0,
        }
    }

    /// Acquires the node in `mode`, queuing behind earlier requests. If the
    /// returned future is dropped while waiting, the queued token is removed
    /// and the node re-notified; if `shutdown` fires, the waiter cleans up
    /// the same way and `Interrupted` is returned.
    async fn acquire(&self, mode: LockMode, shutdown: &Shutdown) -> Result<()> {
        if shutdown.is_triggered() {
            return Err(Error::Interrupted);
        }
        let ticket = {
            let mut state = self.state.lock();
            if state.waiters.is_empty() && state.compatible(mode) {
                state.grant(mode);
                return Ok(());
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.waiters.push_back(Waiter { ticket, mode });
            ticket
        };

        let mut pending = Enqueued { lock: self, ticket, granted: false };
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let interrupted = shutdown.notify.notified();
            tokio::pin!(interrupted);
            interrupted.as_mut().enable();

            if shutdown.is_triggered() {
                // Enqueued removes the token and re-notifies on drop
                return Err(Error::Interrupted);
            }
            {
                let mut state = self.state.lock();
                if state.admissible(pending.ticket, mode) {
                    state.remove(pending.ticket);
                    state.grant(mode);
                    pending.granted = true;
                    drop(state);
                    // let the rest of a reader batch drain
                    self.notify.notify_waiters();
                    return Ok(());
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = interrupted => {}
            }
        }
    }

    pub(crate) fn release(&self, mode: LockMode) -> Result<()> {
        {
            let mut state = self.state.lock();
            match mode {
                LockMode::Exclusive => {
                    if !state.exclusive_held {
                        return Err(Error::InvalidArgument(
                            "path is not locked for exclusive access".to_string(),
                        ));
                    }
                    state.exclusive_held = false;
                }
                LockMode::Shared => {
                    if state.shared_holders == 0 {
                        return Err(Error::InvalidArgument(
                            "path is not locked for shared access".to_string(),
                        ));
                    }
                    state.shared_holders -= 1;
                }
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Waiter token cleanup for cancelled or interrupted acquisitions.
struct Enqueued<'a> {
    lock: &'a NodeLock,
    ticket: u64,
    granted: bool,
}

impl Drop for Enqueued<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.lock.state.lock().remove(self.ticket);
        self.lock.notify.notify_waiters();
    }
}

/// Interruption signal shared by every acquisition of one manager.
#[derive(Default)]
struct Shutdown {
    triggered: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    fn trigger(&self) {
        self.triggered.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// Acquires and releases hierarchical locks over ancestor chains.
#[derive(Default)]
pub struct LockManager {
    shutdown: Shutdown,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the chain `root..=target`: strict ancestors shared, the target
    /// in `mode`. All-or-nothing: on interruption, or if the future is
    /// dropped mid-acquisition, everything taken so far is released in
    /// reverse order.
    pub async fn lock(&self, chain: &[Arc<DirectoryNode>], mode: LockMode) -> Result<()> {
        let mut rollback = ChainRollback { chain, mode, acquired: 0, committed: false };
        for (i, node) in chain.iter().enumerate() {
            node.lock().acquire(mode_for(i, chain.len(), mode), &self.shutdown).await?;
            rollback.acquired = i + 1;
        }
        rollback.committed = true;
        Ok(())
    }

    /// Releases the chain: the target first, then the ancestors bottom-up.
    /// Fails with `InvalidArgument` if the target is not held in `mode`.
    pub fn unlock(&self, chain: &[Arc<DirectoryNode>], mode: LockMode) -> Result<()> {
        for (i, node) in chain.iter().enumerate().rev() {
            node.lock().release(mode_for(i, chain.len(), mode))?;
        }
        Ok(())
    }

    /// Fails every blocked acquisition with `Interrupted` and makes further
    /// acquisitions fail immediately. Called when the server stops; the
    /// manager cannot be reused afterwards.
    pub fn interrupt_all(&self) {
        self.shutdown.trigger();
    }
}

fn mode_for(index: usize, chain_len: usize, mode: LockMode) -> LockMode {
    if index + 1 == chain_len {
        mode
    } else {
        LockMode::Shared
    }
}

struct ChainRollback<'a> {
    chain: &'a [Arc<DirectoryNode>],
    mode: LockMode,
    acquired: usize,
    committed: bool,
}

impl Drop for ChainRollback<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for i in (0..self.acquired).rev() {
            let _ = self.chain[i].lock().release(mode_for(i, self.chain.len(), self.mode));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Path;
    use crate::storage::fake::fake_pair;
    use crate::tree::DirectoryTree;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::{sleep, timeout};

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    /// A tree with a file at `path`, and the chain from the root to it.
    fn tree_with_file(path: &str) -> (Arc<DirectoryTree>, Vec<Arc<DirectoryNode>>) {
        let tree = Arc::new(DirectoryTree::new());
        let (_server, replica) = fake_pair("a");
        assert!(tree.insert(&p(path), &replica, false));
        let chain = tree.lookup_exact(&p(path)).unwrap().ancestor_chain();
        (tree, chain)
    }

    #[tokio::test]
    async fn test_shared_locks_are_concurrent() {
        let (_tree, chain) = tree_with_file("/a");
        let manager = LockManager::new();
        manager.lock(&chain, LockMode::Shared).await.unwrap();
        timeout(Duration::from_secs(1), manager.lock(&chain, LockMode::Shared))
            .await
            .expect("second reader should not block")
            .unwrap();
        manager.unlock(&chain, LockMode::Shared).unwrap();
        manager.unlock(&chain, LockMode::Shared).unwrap();
    }

    #[tokio::test]
    async fn test_exclusive_blocks_readers() {
        let (_tree, chain) = tree_with_file("/a");
        let manager = Arc::new(LockManager::new());
        manager.lock(&chain, LockMode::Exclusive).await.unwrap();

        let (started_tx, started_rx) = oneshot::channel();
        let reader = tokio::spawn({
            let manager = manager.clone();
            let chain = chain.clone();
            async move {
                started_tx.send(()).unwrap();
                manager.lock(&chain, LockMode::Shared).await.unwrap();
                manager.unlock(&chain, LockMode::Shared).unwrap();
            }
        });

        started_rx.await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        manager.unlock(&chain, LockMode::Exclusive).unwrap();
        timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_writer_preference_blocks_late_readers() {
        let (_tree, chain) = tree_with_file("/a");
        let manager = Arc::new(LockManager::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        manager.lock(&chain, LockMode::Shared).await.unwrap();

        let writer = tokio::spawn({
            let manager = manager.clone();
            let chain = chain.clone();
            let order = order.clone();
            async move {
                manager.lock(&chain, LockMode::Exclusive).await.unwrap();
                order.lock().push("writer");
                manager.unlock(&chain, LockMode::Exclusive).unwrap();
            }
        });
        sleep(Duration::from_millis(50)).await;

        let reader = tokio::spawn({
            let manager = manager.clone();
            let chain = chain.clone();
            let order = order.clone();
            async move {
                manager.lock(&chain, LockMode::Shared).await.unwrap();
                order.lock().push("reader");
                manager.unlock(&chain, LockMode::Shared).unwrap();
            }
        });
        sleep(Duration::from_millis(50)).await;

        // neither the queued writer nor the late reader may overtake the
        // holder, and the reader may not overtake the queued writer
        assert!(order.lock().is_empty());

        manager.unlock(&chain, LockMode::Shared).unwrap();
        timeout(Duration::from_secs(1), writer).await.unwrap().unwrap();
        timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
        assert_eq!(*order.lock(), vec!["writer", "reader"]);
    }

    #[tokio::test]
    async fn test_reader_batch_admitted_together() {
        let (_tree, chain) = tree_with_file("/a");
        let manager = Arc::new(LockManager::new());
        manager.lock(&chain, LockMode::Exclusive).await.unwrap();

        let mut readers = Vec::new();
        for _ in 0..3 {
            let manager = manager.clone();
            let chain = chain.clone();
            readers.push(tokio::spawn(async move {
                manager.lock(&chain, LockMode::Shared).await.unwrap();
            }));
        }
        sleep(Duration::from_millis(50)).await;

        manager.unlock(&chain, LockMode::Exclusive).unwrap();
        for reader in readers {
            timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
        }
        // all three readers hold the node at once
        for _ in 0..3 {
            manager.unlock(&chain, LockMode::Shared).unwrap();
        }
        assert!(manager.unlock(&chain, LockMode::Shared).is_err());
    }

    #[tokio::test]
    async fn test_exclusive_on_ancestor_blocks_descendant_readers() {
        let (tree, chain) = tree_with_file("/a/b/c");
        let manager = Arc::new(LockManager::new());

        let parent_chain = tree.lookup_exact(&p("/a")).unwrap().ancestor_chain();
        manager.lock(&parent_chain, LockMode::Exclusive).await.unwrap();

        let reader = tokio::spawn({
            let manager = manager.clone();
            let chain = chain.clone();
            async move {
                manager.lock(&chain, LockMode::Shared).await.unwrap();
                manager.unlock(&chain, LockMode::Shared).unwrap();
            }
        });
        sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        manager.unlock(&parent_chain, LockMode::Exclusive).unwrap();
        timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disjoint_subtrees_lock_in_parallel() {
        let tree = Arc::new(DirectoryTree::new());
        let (_server, replica) = fake_pair("a");
        assert!(tree.insert(&p("/a/x"), &replica, false));
        assert!(tree.insert(&p("/b/y"), &replica, false));
        let manager = LockManager::new();

        let left = tree.lookup_exact(&p("/a/x")).unwrap().ancestor_chain();
        let right = tree.lookup_exact(&p("/b/y")).unwrap().ancestor_chain();
        manager.lock(&left, LockMode::Exclusive).await.unwrap();
        timeout(Duration::from_secs(1), manager.lock(&right, LockMode::Exclusive))
            .await
            .expect("disjoint writers share only the root, in shared mode")
            .unwrap();
        manager.unlock(&left, LockMode::Exclusive).unwrap();
        manager.unlock(&right, LockMode::Exclusive).unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_waiter_cleans_up() {
        let (_tree, chain) = tree_with_file("/a");
        let manager = Arc::new(LockManager::new());
        manager.lock(&chain, LockMode::Shared).await.unwrap();

        let waiter = tokio::spawn({
            let manager = manager.clone();
            let chain = chain.clone();
            async move {
                let _ = manager.lock(&chain, LockMode::Exclusive).await;
            }
        });
        sleep(Duration::from_millis(50)).await;
        waiter.abort();
        let _ = waiter.await;

        manager.unlock(&chain, LockMode::Shared).unwrap();
        // the abandoned waiter token must not wedge the queue
        timeout(Duration::from_secs(1), manager.lock(&chain, LockMode::Exclusive))
            .await
            .expect("queue should be clean after cancellation")
            .unwrap();
        manager.unlock(&chain, LockMode::Exclusive).unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_fails_blocked_acquires() {
        let (_tree, chain) = tree_with_file("/a");
        let manager = Arc::new(LockManager::new());
        manager.lock(&chain, LockMode::Exclusive).await.unwrap();

        let waiter = tokio::spawn({
            let manager = manager.clone();
            let chain = chain.clone();
            async move { manager.lock(&chain, LockMode::Shared).await }
        });
        sleep(Duration::from_millis(50)).await;

        manager.interrupt_all();
        let result = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(matches!(result, Err(Error::Interrupted)));

        // the interrupted waiter left no token behind; the holder can still
        // release, and new acquisitions fail fast
        manager.unlock(&chain, LockMode::Exclusive).unwrap();
        assert!(matches!(
            manager.lock(&chain, LockMode::Shared).await,
            Err(Error::Interrupted)
        ));
    }

    #[tokio::test]
    async fn test_unlock_without_lock_is_invalid() {
        let (_tree, chain) = tree_with_file("/a");
        let manager = LockManager::new();
        assert!(manager.unlock(&chain, LockMode::Shared).is_err());
        assert!(manager.unlock(&chain, LockMode::Exclusive).is_err());
    }
}
