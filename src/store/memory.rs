//! In-memory state store for testing

use crate::error::StorageError;
use crate::operation::{Cluster, NodeCollection, NodeInfo, Operation};
use crate::store::{RuntimeSettings, StateStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    operations: RwLock<HashMap<String, Operation>>,
    clusters: RwLock<HashMap<String, Cluster>>,
    nodes: RwLock<HashMap<String, NodeInfo>>,
    runtime: RwLock<Option<RuntimeSettings>>,
    operation_writes: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of operation saves, for asserting persistence cadence.
    pub fn operation_writes(&self) -> usize {
        self.operation_writes.load(Ordering::SeqCst)
    }
}

impl StateStore for MemoryStateStore {
    fn get_operation(&self, operation_id: &str) -> Result<Option<Operation>, StorageError> {
        Ok(self.operations.read().get(operation_id).cloned())
    }

    fn save_operation(&self, operation: &Operation) -> Result<(), StorageError> {
        self.operations
            .write()
            .insert(operation.id.clone(), operation.clone());
        self.operation_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list_operations(&self) -> Result<Vec<Operation>, StorageError> {
        let mut out: Vec<Operation> = self.operations.read().values().cloned().collect();
        out.sort_by_key(|op| op.created_at);
        Ok(out)
    }

    fn get_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>, StorageError> {
        Ok(self.clusters.read().get(cluster_id).cloned())
    }

    fn save_cluster(&self, cluster: &Cluster) -> Result<(), StorageError> {
        self.clusters
            .write()
            .insert(cluster.id.clone(), cluster.clone());
        Ok(())
    }

    fn list_clusters(&self) -> Result<Vec<Cluster>, StorageError> {
        let mut out: Vec<Cluster> = self.clusters.read().values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn get_node(&self, node_id: &str) -> Result<Option<NodeInfo>, StorageError> {
        Ok(self.nodes.read().get(node_id).cloned())
    }

    fn save_node(&self, node: &NodeInfo) -> Result<(), StorageError> {
        self.nodes.write().insert(node.id.clone(), node.clone());
        Ok(())
    }

    fn list_nodes(&self) -> Result<NodeCollection, StorageError> {
        Ok(self.nodes.read().values().cloned().collect())
    }

    fn get_runtime_settings(&self) -> Result<Option<RuntimeSettings>, StorageError> {
        Ok(self.runtime.read().clone())
    }

    fn save_runtime_settings(&self, settings: &RuntimeSettings) -> Result<(), StorageError> {
        *self.runtime.write() = Some(settings.clone());
        Ok(())
    }
}
