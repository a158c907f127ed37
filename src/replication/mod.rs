//! Read-triggered background replication.
//!
//! A bounded pool of workers drains a queue of grow requests. Each job takes
//! the shared chain lock itself, as a normal client of the lock manager, so
//! replica work is serialised with client access on the same path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, warn};

use crate::common::{NamingConfig, Path};
use crate::naming::NamingCore;

pub struct ReplicationController {
    jobs: mpsc::Sender<Path>,
    inflight: Arc<Inflight>,
}

struct Inflight {
    count: AtomicUsize,
    idle: Notify,
}

impl Inflight {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl ReplicationController {
    /// Spawns the worker pool. Workers hold the core weakly so the pool
    /// winds down once the naming server is dropped.
    pub(crate) fn spawn(core: Weak<NamingCore>, config: &NamingConfig) -> Self {
        let (jobs, receiver) = mpsc::channel(config.replication_queue_depth.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let inflight = Arc::new(Inflight { count: AtomicUsize::new(0), idle: Notify::new() });

        for worker in 0..config.replication_workers.max(1) {
            let receiver = receiver.clone();
            let core = core.clone();
            let inflight = inflight.clone();
            tokio::spawn(async move {
                loop {
                    let job = { receiver.lock().await.recv().await };
                    let Some(path) = job else { break };
                    match core.upgrade() {
                        Some(core) => {
                            if let Err(e) = core.grow_replica(&path).await {
                                warn!(%path, error = %e, "replica grow aborted");
                            }
                            inflight.finish();
                        }
                        None => {
                            inflight.finish();
                            break;
                        }
                    }
                }
                debug!(worker, "replication worker stopped");
            });
        }

        Self { jobs, inflight }
    }

    /// Queues a grow request. A full queue drops the request; the next read
    /// past the threshold will schedule it again.
    pub fn schedule(&self, path: Path) {
        self.inflight.start();
        match self.jobs.try_send(path) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(path)) => {
                self.inflight.finish();
                warn!(%path, "replication queue full, dropping grow request");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.inflight.finish();
            }
        }
    }

    /// Resolves once every queued and running job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inflight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inflight.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}
