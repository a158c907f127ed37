//! gRPC-backed stubs for remote storage servers.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tonic::transport::Channel;

use crate::common::{Error, Path, Result};
use crate::wire::command_service_client::CommandServiceClient;
use crate::wire::storage_service_client::StorageServiceClient;
use crate::wire::{
    CopyRequest, CreateFileRequest, DeleteFileRequest, ReadRequest, SizeRequest, WriteRequest,
};

use super::{Command, CommandStub, Storage, StorageStub};

/// Builds the stub pair for a storage server from its two endpoints, as
/// reported during registration.
pub fn connect_pair(storage_endpoint: &str, command_endpoint: &str) -> (StorageStub, CommandStub) {
    (storage_stub(storage_endpoint), command_stub(command_endpoint))
}

pub fn storage_stub(endpoint: &str) -> StorageStub {
    StorageStub::new(endpoint, Arc::new(RemoteStorage { endpoint: endpoint.to_string() }))
}

pub fn command_stub(endpoint: &str) -> CommandStub {
    CommandStub::new(endpoint, Arc::new(RemoteCommand { endpoint: endpoint.to_string() }))
}

struct RemoteStorage {
    endpoint: String,
}

impl RemoteStorage {
    async fn client(&self) -> Result<StorageServiceClient<Channel>> {
        StorageServiceClient::connect(self.endpoint.clone())
            .await
            .map_err(|e| Error::Rpc(format!("connect to storage {}: {e}", self.endpoint)))
    }
}

#[async_trait]
impl Storage for RemoteStorage {
    async fn size(&self, path: &Path) -> Result<u64> {
        let mut client = self.client().await?;
        let response = client
            .size(SizeRequest { path: path.to_string() })
            .await
            .map_err(|e| Error::Rpc(format!("size {path}: {e}")))?
            .into_inner();
        Ok(response.size as u64)
    }

    async fn read(&self, path: &Path, offset: u64, length: u32) -> Result<Bytes> {
        let mut client = self.client().await?;
        let response = client
            .read(ReadRequest {
                path: path.to_string(),
                offset: offset as i64,
                length: length as i32,
            })
            .await
            .map_err(|e| Error::Rpc(format!("read {path}: {e}")))?
            .into_inner();
        Ok(Bytes::from(response.data))
    }

    async fn write(&self, path: &Path, offset: u64, data: Bytes) -> Result<()> {
        let mut client = self.client().await?;
        client
            .write(WriteRequest {
                path: path.to_string(),
                offset: offset as i64,
                data: data.to_vec(),
            })
            .await
            .map_err(|e| Error::Rpc(format!("write {path}: {e}")))?;
        Ok(())
    }
}

struct RemoteCommand {
    endpoint: String,
}

impl RemoteCommand {
    async fn client(&self) -> Result<CommandServiceClient<Channel>> {
        CommandServiceClient::connect(self.endpoint.clone())
            .await
            .map_err(|e| Error::Rpc(format!("connect to command {}: {e}", self.endpoint)))
    }
}

#[async_trait]
impl Command for RemoteCommand {
    async fn create(&self, path: &Path) -> Result<bool> {
        let mut client = self.client().await?;
        let response = client
            .create(CreateFileRequest { path: path.to_string() })
            .await
            .map_err(|e| Error::Rpc(format!("create {path}: {e}")))?
            .into_inner();
        Ok(response.ok)
    }

    async fn delete(&self, path: &Path) -> Result<bool> {
        let mut client = self.client().await?;
        let response = client
            .delete(DeleteFileRequest { path: path.to_string() })
            .await
            .map_err(|e| Error::Rpc(format!("delete {path}: {e}")))?
            .into_inner();
        Ok(response.ok)
    }

    async fn copy(&self, path: &Path, source: &StorageStub) -> Result<bool> {
        let mut client = self.client().await?;
        let response = client
            .copy(CopyRequest {
                path: path.to_string(),
                source_endpoint: source.endpoint().to_string(),
            })
            .await
            .map_err(|e| Error::Rpc(format!("copy {path}: {e}")))?
            .into_inner();
        Ok(response.ok)
    }
}
