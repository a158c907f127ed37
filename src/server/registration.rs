use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::common::Path;
use crate::naming::NamingServer;
use crate::storage::grpc::connect_pair;
use crate::wire::registration_service_server::{RegistrationService, RegistrationServiceServer};
use crate::wire::{RegisterRequest, RegisterResponse};

use super::{parse_path, to_status};

pub struct RegistrationServiceImpl {
    naming: Arc<NamingServer>,
}

impl RegistrationServiceImpl {
    pub fn new(naming: Arc<NamingServer>) -> Self {
        Self { naming }
    }

    pub fn into_server(self) -> RegistrationServiceServer<Self> {
        RegistrationServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl RegistrationService for RegistrationServiceImpl {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(
            storage = %req.storage_endpoint,
            files = req.files.len(),
            "received registration"
        );

        let mut files = Vec::with_capacity(req.files.len());
        for raw in &req.files {
            files.push(parse_path(raw)?);
        }
        let (storage, command) = connect_pair(&req.storage_endpoint, &req.command_endpoint);
        let duplicates = self
            .naming
            .register(storage, command, files)
            .await
            .map_err(to_status)?;

        Ok(Response::new(RegisterResponse {
            duplicates: duplicates.iter().map(Path::to_string).collect(),
        }))
    }
}
