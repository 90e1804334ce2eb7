//! Per-run shared state.
//!
//! The executor and every node-task callback of a step touch the same Operation and
//! Cluster concurrently, so a run owns them behind locks and hands out guards.
//! Lock order is operation before cluster.

use crate::error::StorageError;
use crate::operation::{Cluster, NodeCollection, Operation};
use crate::store::StateStore;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

pub struct RunState {
    operation_id: String,
    operation: Mutex<Operation>,
    cluster: Mutex<Cluster>,
    nodes: NodeCollection,
    store: Arc<dyn StateStore>,
}

impl RunState {
    pub fn new(
        operation: Operation,
        cluster: Cluster,
        nodes: NodeCollection,
        store: Arc<dyn StateStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            operation_id: operation.id.clone(),
            operation: Mutex::new(operation),
            cluster: Mutex::new(cluster),
            nodes,
            store,
        })
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn operation(&self) -> MutexGuard<'_, Operation> {
        self.operation.lock()
    }

    pub fn cluster(&self) -> MutexGuard<'_, Cluster> {
        self.cluster.lock()
    }

    pub fn nodes(&self) -> &NodeCollection {
        &self.nodes
    }

    /// Append a persisted log entry to the operation (not saved until the next save).
    pub fn log(&self, step_index: Option<usize>, node_id: Option<&str>, message: impl Into<String>) {
        self.operation().log(step_index, node_id, message);
    }

    /// Save the operation. The lock is held across the write so concurrent saves
    /// land in the order their mutations were made.
    pub fn save_operation(&self) -> Result<(), StorageError> {
        let operation = self.operation();
        self.store.save_operation(&operation)
    }

    pub fn save_cluster(&self) -> Result<(), StorageError> {
        let cluster = self.cluster();
        self.store.save_cluster(&cluster)
    }

    pub fn snapshot(&self) -> (Operation, Cluster) {
        let operation = self.operation().clone();
        let cluster = self.cluster().clone();
        (operation, cluster)
    }
}
