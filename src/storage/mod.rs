//! The storage-server contract consumed by the naming core.
//!
//! Storage servers hold file bytes and expose two capability sets: the
//! client-facing [`Storage`] interface and the privileged [`Command`]
//! interface used by the naming server to create, delete, and copy files.
//! The core only ever sees stub handles; the gRPC transport behind them
//! lives in [`grpc`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rand::Rng;

use crate::common::{Path, Result};

pub mod grpc;

#[cfg(test)]
pub(crate) mod fake;

/// Client-facing capabilities of one storage server.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn size(&self, path: &Path) -> Result<u64>;

    async fn read(&self, path: &Path, offset: u64, length: u32) -> Result<Bytes>;

    async fn write(&self, path: &Path, offset: u64, data: Bytes) -> Result<()>;
}

/// Privileged capabilities of one storage server.
#[async_trait]
pub trait Command: Send + Sync {
    async fn create(&self, path: &Path) -> Result<bool>;

    async fn delete(&self, path: &Path) -> Result<bool>;

    /// Commands the server to fetch a complete copy of `path` from the
    /// storage server identified by `source`.
    async fn copy(&self, path: &Path, source: &StorageStub) -> Result<bool>;
}

/// Handle to one storage server's client interface. Two stubs refer to the
/// same server iff their endpoints match.
#[derive(Clone)]
pub struct StorageStub {
    endpoint: String,
    inner: Arc<dyn Storage>,
}

impl StorageStub {
    pub fn new(endpoint: impl Into<String>, inner: Arc<dyn Storage>) -> Self {
        Self { endpoint: endpoint.into(), inner }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn size(&self, path: &Path) -> Result<u64> {
        self.inner.size(path).await
    }

    pub async fn read(&self, path: &Path, offset: u64, length: u32) -> Result<Bytes> {
        self.inner.read(path, offset, length).await
    }

    pub async fn write(&self, path: &Path, offset: u64, data: Bytes) -> Result<()> {
        self.inner.write(path, offset, data).await
    }
}

impl PartialEq for StorageStub {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint
    }
}

impl Eq for StorageStub {}

impl fmt::Debug for StorageStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageStub").field("endpoint", &self.endpoint).finish()
    }
}

/// Handle to one storage server's command interface.
#[derive(Clone)]
pub struct CommandStub {
    endpoint: String,
    inner: Arc<dyn Command>,
}

impl CommandStub {
    pub fn new(endpoint: impl Into<String>, inner: Arc<dyn Command>) -> Self {
        Self { endpoint: endpoint.into(), inner }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn create(&self, path: &Path) -> Result<bool> {
        self.inner.create(path).await
    }

    pub async fn delete(&self, path: &Path) -> Result<bool> {
        self.inner.delete(path).await
    }

    pub async fn copy(&self, path: &Path, source: &StorageStub) -> Result<bool> {
        self.inner.copy(path, source).await
    }
}

impl fmt::Debug for CommandStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandStub").field("endpoint", &self.endpoint).finish()
    }
}

/// One complete copy of a file: the stub pair of the server holding it.
#[derive(Clone, Debug)]
pub struct Replica {
    pub storage: StorageStub,
    pub command: CommandStub,
}

/// Process-wide table of registered storage servers, keeping the mapping
/// from each client-facing stub to its command stub.
#[derive(Default)]
pub struct StorageRegistry {
    servers: RwLock<Vec<Replica>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, storage: &StorageStub) -> bool {
        self.servers.read().iter().any(|replica| replica.storage == *storage)
    }

    pub fn add(&self, replica: Replica) {
        self.servers.write().push(replica);
    }

    pub fn len(&self) -> usize {
        self.servers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }

    /// Registered servers that do not appear in `existing`.
    pub fn spares(&self, existing: &[Replica]) -> Vec<Replica> {
        self.servers
            .read()
            .iter()
            .filter(|replica| !existing.iter().any(|held| held.storage == replica.storage))
            .cloned()
            .collect()
    }

    pub fn pick_random(&self) -> Option<Replica> {
        let servers = self.servers.read();
        pick_random(&servers)
    }
}

/// Uniform random choice from a replica slice.
pub fn pick_random(replicas: &[Replica]) -> Option<Replica> {
    if replicas.is_empty() {
        return None;
    }
    let index = rand::rng().random_range(0..replicas.len());
    Some(replicas[index].clone())
}
