//! gRPC endpoints of the naming server: the client-facing service interface
//! and the storage-server-facing registration interface.

pub mod registration;
pub mod service;

use tonic::Status;

use crate::common::{Error, Path};

pub(crate) fn to_status(err: Error) -> Status {
    match err {
        Error::InvalidPath(_) | Error::InvalidArgument(_) => {
            Status::invalid_argument(err.to_string())
        }
        Error::PathNotFound(_) => Status::not_found(err.to_string()),
        Error::InvalidState(_) => Status::failed_precondition(err.to_string()),
        Error::AlreadyRegistered(_) => Status::already_exists(err.to_string()),
        Error::Interrupted => Status::aborted(err.to_string()),
        Error::Rpc(_) | Error::Io(_) => Status::internal(err.to_string()),
    }
}

pub(crate) fn parse_path(raw: &str) -> Result<Path, Status> {
    raw.parse().map_err(to_status)
}
