pub mod client;
pub mod cmd;
pub mod common;
pub mod lock;
pub mod naming;
pub mod replication;
pub mod server;
pub mod storage;
pub mod tree;

// Generated gRPC code
pub mod wire {
    tonic::include_proto!("namio.wire");
}
