//! Typed client for the naming server's service interface.

use tonic::transport::Channel;

use crate::common::{Error, Result};
use crate::wire::naming_service_client::NamingServiceClient;
use crate::wire::{LockRequest, PathRequest, UnlockRequest};

/// Connects per call, like the storage stubs, and maps transport errors into
/// the crate error type.
#[derive(Clone)]
pub struct NamingClient {
    endpoint: String,
}

impl NamingClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into() }
    }

    async fn client(&self) -> Result<NamingServiceClient<Channel>> {
        NamingServiceClient::connect(self.endpoint.clone())
            .await
            .map_err(|e| Error::Rpc(format!("connect to naming server {}: {e}", self.endpoint)))
    }

    pub async fn lock(&self, path: &str, exclusive: bool) -> Result<()> {
        let mut client = self.client().await?;
        client
            .lock(LockRequest { path: path.to_string(), exclusive })
            .await
            .map_err(|e| Error::Rpc(format!("lock {path}: {e}")))?;
        Ok(())
    }

    pub async fn unlock(&self, path: &str, exclusive: bool) -> Result<()> {
        let mut client = self.client().await?;
        client
            .unlock(UnlockRequest { path: path.to_string(), exclusive })
            .await
            .map_err(|e| Error::Rpc(format!("unlock {path}: {e}")))?;
        Ok(())
    }

    pub async fn is_directory(&self, path: &str) -> Result<bool> {
        let mut client = self.client().await?;
        let response = client
            .is_directory(PathRequest { path: path.to_string() })
            .await
            .map_err(|e| Error::Rpc(format!("is_directory {path}: {e}")))?
            .into_inner();
        Ok(response.is_directory)
    }

    pub async fn list(&self, path: &str) -> Result<Vec<String>> {
        let mut client = self.client().await?;
        let response = client
            .list(PathRequest { path: path.to_string() })
            .await
            .map_err(|e| Error::Rpc(format!("list {path}: {e}")))?
            .into_inner();
        Ok(response.names)
    }

    pub async fn create_file(&self, path: &str) -> Result<bool> {
        let mut client = self.client().await?;
        let response = client
            .create_file(PathRequest { path: path.to_string() })
            .await
            .map_err(|e| Error::Rpc(format!("create_file {path}: {e}")))?
            .into_inner();
        Ok(response.created)
    }

    pub async fn create_directory(&self, path: &str) -> Result<bool> {
        let mut client = self.client().await?;
        let response = client
            .create_directory(PathRequest { path: path.to_string() })
            .await
            .map_err(|e| Error::Rpc(format!("create_directory {path}: {e}")))?
            .into_inner();
        Ok(response.created)
    }

    pub async fn delete(&self, path: &str) -> Result<bool> {
        let mut client = self.client().await?;
        let response = client
            .delete(PathRequest { path: path.to_string() })
            .await
            .map_err(|e| Error::Rpc(format!("delete {path}: {e}")))?
            .into_inner();
        Ok(response.deleted)
    }

    /// Returns the endpoint of a storage server currently serving `path`.
    pub async fn get_storage(&self, path: &str) -> Result<String> {
        let mut client = self.client().await?;
        let response = client
            .get_storage(PathRequest { path: path.to_string() })
            .await
            .map_err(|e| Error::Rpc(format!("get_storage {path}: {e}")))?
            .into_inner();
        Ok(response.storage_endpoint)
    }
}
