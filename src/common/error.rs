use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("RPC error: {0}")]
    Rpc(String),
}

pub type Result<T> = std::result::Result<T, Error>;
