//! Operation state store
//!
//! The only state shared across runs and processes. Every durable transition of
//! the engine goes through it. Writes to one key are last-writer-wins; there is no
//! optimistic-concurrency check.

pub mod memory;
pub mod persistence;

pub use memory::MemoryStateStore;
pub use persistence::SledStateStore;

use crate::error::StorageError;
use crate::operation::{Cluster, NodeCollection, NodeInfo, Operation};
use serde::{Deserialize, Serialize};

/// Runtime overrides kept in the store by the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_timeout_secs: Option<u64>,
}

/// Persisted-store interface. All calls are synchronous.
pub trait StateStore: Send + Sync {
    fn get_operation(&self, operation_id: &str) -> Result<Option<Operation>, StorageError>;
    fn save_operation(&self, operation: &Operation) -> Result<(), StorageError>;
    fn list_operations(&self) -> Result<Vec<Operation>, StorageError>;

    fn get_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>, StorageError>;
    fn save_cluster(&self, cluster: &Cluster) -> Result<(), StorageError>;
    fn list_clusters(&self) -> Result<Vec<Cluster>, StorageError>;

    fn get_node(&self, node_id: &str) -> Result<Option<NodeInfo>, StorageError>;
    fn save_node(&self, node: &NodeInfo) -> Result<(), StorageError>;
    fn list_nodes(&self) -> Result<NodeCollection, StorageError>;

    fn get_runtime_settings(&self) -> Result<Option<RuntimeSettings>, StorageError>;
    fn save_runtime_settings(&self, settings: &RuntimeSettings) -> Result<(), StorageError>;

    /// Fetch an operation that must exist.
    fn require_operation(&self, operation_id: &str) -> Result<Operation, StorageError> {
        self.get_operation(operation_id)?
            .ok_or_else(|| StorageError::NotFound {
                kind: "Operation",
                id: operation_id.to_string(),
            })
    }

    /// Fetch a cluster that must exist.
    fn require_cluster(&self, cluster_id: &str) -> Result<Cluster, StorageError> {
        self.get_cluster(cluster_id)?
            .ok_or_else(|| StorageError::NotFound {
                kind: "Cluster",
                id: cluster_id.to_string(),
            })
    }
}
