use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::naming::NamingServer;
use crate::wire::naming_service_server::{NamingService, NamingServiceServer};
use crate::wire::{
    CreateResponse, DeleteResponse, GetStorageResponse, IsDirectoryResponse, ListResponse,
    LockRequest, LockResponse, PathRequest, UnlockRequest, UnlockResponse,
};

use super::{parse_path, to_status};

pub struct NamingServiceImpl {
    naming: Arc<NamingServer>,
}

impl NamingServiceImpl {
    pub fn new(naming: Arc<NamingServer>) -> Self {
        Self { naming }
    }

    pub fn into_server(self) -> NamingServiceServer<Self> {
        NamingServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl NamingService for NamingServiceImpl {
    async fn lock(
        &self,
        request: Request<LockRequest>,
    ) -> Result<Response<LockResponse>, Status> {
        let req = request.into_inner();
        let path = parse_path(&req.path)?;
        self.naming.lock(&path, req.exclusive).await.map_err(to_status)?;
        Ok(Response::new(LockResponse {}))
    }

    async fn unlock(
        &self,
        request: Request<UnlockRequest>,
    ) -> Result<Response<UnlockResponse>, Status> {
        let req = request.into_inner();
        let path = parse_path(&req.path)?;
        self.naming.unlock(&path, req.exclusive).await.map_err(to_status)?;
        Ok(Response::new(UnlockResponse {}))
    }

    async fn is_directory(
        &self,
        request: Request<PathRequest>,
    ) -> Result<Response<IsDirectoryResponse>, Status> {
        let path = parse_path(&request.into_inner().path)?;
        let is_directory = self.naming.is_directory(&path).map_err(to_status)?;
        Ok(Response::new(IsDirectoryResponse { is_directory }))
    }

    async fn list(
        &self,
        request: Request<PathRequest>,
    ) -> Result<Response<ListResponse>, Status> {
        let path = parse_path(&request.into_inner().path)?;
        let names = self.naming.list(&path).map_err(to_status)?;
        Ok(Response::new(ListResponse { names }))
    }

    async fn create_file(
        &self,
        request: Request<PathRequest>,
    ) -> Result<Response<CreateResponse>, Status> {
        let path = parse_path(&request.into_inner().path)?;
        let created = self.naming.create_file(&path).await.map_err(to_status)?;
        Ok(Response::new(CreateResponse { created }))
    }

    async fn create_directory(
        &self,
        request: Request<PathRequest>,
    ) -> Result<Response<CreateResponse>, Status> {
        let path = parse_path(&request.into_inner().path)?;
        let created = self.naming.create_directory(&path).await.map_err(to_status)?;
        Ok(Response::new(CreateResponse { created }))
    }

    async fn delete(
        &self,
        request: Request<PathRequest>,
    ) -> Result<Response<DeleteResponse>, Status> {
        let path = parse_path(&request.into_inner().path)?;
        let deleted = self.naming.delete(&path).await.map_err(to_status)?;
        Ok(Response::new(DeleteResponse { deleted }))
    }

    async fn get_storage(
        &self,
        request: Request<PathRequest>,
    ) -> Result<Response<GetStorageResponse>, Status> {
        let path = parse_path(&request.into_inner().path)?;
        let stub = self.naming.get_storage(&path).map_err(to_status)?;
        Ok(Response::new(GetStorageResponse {
            storage_endpoint: stub.endpoint().to_string(),
        }))
    }
}
