use anyhow::Result;
use serde::Deserialize;
use std::fs;

/// Well-known port for the client-facing service interface.
pub const SERVICE_PORT: u16 = 6000;

/// Well-known port for the storage-server registration interface.
pub const REGISTRATION_PORT: u16 = 6001;

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    #[serde(default = "default_service_listen")]
    pub service_listen: String,

    #[serde(default = "default_registration_listen")]
    pub registration_listen: String,

    /// Shared-lock acquisitions on a file before a replica grow is scheduled.
    #[serde(default = "default_replica_threshold")]
    pub replica_threshold: u64,

    #[serde(default = "default_replication_workers")]
    pub replication_workers: usize,

    #[serde(default = "default_replication_queue_depth")]
    pub replication_queue_depth: usize,
}

impl NodeConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let cfg: NodeConfig = toml::from_str(&content)?;
        Ok(cfg)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            service_listen: default_service_listen(),
            registration_listen: default_registration_listen(),
            replica_threshold: default_replica_threshold(),
            replication_workers: default_replication_workers(),
            replication_queue_depth: default_replication_queue_depth(),
        }
    }
}

/// Tunables consumed by the naming core.
#[derive(Debug, Clone)]
pub struct NamingConfig {
    pub replica_threshold: u64,
    pub replication_workers: usize,
    pub replication_queue_depth: usize,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            replica_threshold: default_replica_threshold(),
            replication_workers: default_replication_workers(),
            replication_queue_depth: default_replication_queue_depth(),
        }
    }
}

impl From<&NodeConfig> for NamingConfig {
    fn from(cfg: &NodeConfig) -> Self {
        Self {
            replica_threshold: cfg.replica_threshold,
            replication_workers: cfg.replication_workers,
            replication_queue_depth: cfg.replication_queue_depth,
        }
    }
}

fn default_service_listen() -> String {
    format!("0.0.0.0:{SERVICE_PORT}")
}

fn default_registration_listen() -> String {
    format!("0.0.0.0:{REGISTRATION_PORT}")
}

fn default_replica_threshold() -> u64 {
    2
}

fn default_replication_workers() -> usize {
    4
}

fn default_replication_queue_depth() -> usize {
    64
}
