//! Recording in-memory stubs standing in for storage servers in tests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::common::{Path, Result};

use super::{Command, CommandStub, Replica, Storage, StorageStub};

/// Call log of one fake storage server.
#[derive(Default)]
pub struct FakeServer {
    pub created: Mutex<Vec<Path>>,
    pub deleted: Mutex<Vec<Path>>,
    /// `(path, source storage endpoint)` per received copy command.
    pub copied: Mutex<Vec<(Path, String)>>,
}

impl FakeServer {
    pub fn created_paths(&self) -> Vec<Path> {
        self.created.lock().clone()
    }

    pub fn deleted_paths(&self) -> Vec<Path> {
        self.deleted.lock().clone()
    }

    pub fn copies(&self) -> Vec<(Path, String)> {
        self.copied.lock().clone()
    }
}

/// Builds a fake server named `name` and its registration stub pair.
pub fn fake_pair(name: &str) -> (Arc<FakeServer>, Replica) {
    let server = Arc::new(FakeServer::default());
    let storage = StorageStub::new(format!("http://{name}:7000"), Arc::new(FakeStorage));
    let command = CommandStub::new(
        format!("http://{name}:7001"),
        Arc::new(FakeCommand { server: server.clone() }),
    );
    (server, Replica { storage, command })
}

struct FakeStorage;

#[async_trait]
impl Storage for FakeStorage {
    async fn size(&self, _path: &Path) -> Result<u64> {
        Ok(0)
    }

    async fn read(&self, _path: &Path, _offset: u64, _length: u32) -> Result<Bytes> {
        Ok(Bytes::new())
    }

    async fn write(&self, _path: &Path, _offset: u64, _data: Bytes) -> Result<()> {
        Ok(())
    }
}

struct FakeCommand {
    server: Arc<FakeServer>,
}

#[async_trait]
impl Command for FakeCommand {
    async fn create(&self, path: &Path) -> Result<bool> {
        self.server.created.lock().push(path.clone());
        Ok(true)
    }

    async fn delete(&self, path: &Path) -> Result<bool> {
        self.server.deleted.lock().push(path.clone());
        Ok(true)
    }

    async fn copy(&self, path: &Path, source: &StorageStub) -> Result<bool> {
        self.server
            .copied
            .lock()
            .push((path.clone(), source.endpoint().to_string()));
        Ok(true)
    }
}
