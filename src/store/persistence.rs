//! Sled-backed state store.
//!
//! One tree per record kind, JSON values keyed by id.

use crate::error::StorageError;
use crate::operation::{Cluster, NodeCollection, NodeInfo, Operation};
use crate::store::{RuntimeSettings, StateStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use std::path::Path;
use tracing::debug;

const TREE_OPERATIONS: &str = "operations";
const TREE_CLUSTERS: &str = "clusters";
const TREE_NODES: &str = "nodes";
const TREE_RUNTIME: &str = "runtime";
const RUNTIME_KEY: &[u8] = b"settings";

#[derive(Clone)]
pub struct SledStateStore {
    db: Db,
    operations: Tree,
    clusters: Tree,
    nodes: Tree,
    runtime: Tree,
}

impl SledStateStore {
    /// Open (or create) a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = sled::open(path).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open sled database at {}: {}", path.display(), e),
            ))
        })?;
        debug!(path = %path.display(), "Opened state store");
        Self::new(db)
    }

    pub fn new(db: Db) -> Result<Self, StorageError> {
        let operations = db.open_tree(TREE_OPERATIONS)?;
        let clusters = db.open_tree(TREE_CLUSTERS)?;
        let nodes = db.open_tree(TREE_NODES)?;
        let runtime = db.open_tree(TREE_RUNTIME)?;
        Ok(Self {
            db,
            operations,
            clusters,
            nodes,
            runtime,
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn get_json<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> Result<Option<T>, StorageError> {
    let Some(raw) = tree.get(key)? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&raw)?))
}

fn put_json<T: Serialize>(tree: &Tree, key: &[u8], value: &T) -> Result<(), StorageError> {
    let encoded = serde_json::to_vec(value)?;
    tree.insert(key, encoded)?;
    Ok(())
}

fn scan_json<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, StorageError> {
    let mut out = Vec::new();
    for entry in tree.iter() {
        let (_, value) = entry?;
        out.push(serde_json::from_slice(&value)?);
    }
    Ok(out)
}

impl StateStore for SledStateStore {
    fn get_operation(&self, operation_id: &str) -> Result<Option<Operation>, StorageError> {
        get_json(&self.operations, operation_id.as_bytes())
    }

    fn save_operation(&self, operation: &Operation) -> Result<(), StorageError> {
        put_json(&self.operations, operation.id.as_bytes(), operation)
    }

    fn list_operations(&self) -> Result<Vec<Operation>, StorageError> {
        let mut out: Vec<Operation> = scan_json(&self.operations)?;
        out.sort_by_key(|op| op.created_at);
        Ok(out)
    }

    fn get_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>, StorageError> {
        get_json(&self.clusters, cluster_id.as_bytes())
    }

    fn save_cluster(&self, cluster: &Cluster) -> Result<(), StorageError> {
        put_json(&self.clusters, cluster.id.as_bytes(), cluster)
    }

    fn list_clusters(&self) -> Result<Vec<Cluster>, StorageError> {
        scan_json(&self.clusters)
    }

    fn get_node(&self, node_id: &str) -> Result<Option<NodeInfo>, StorageError> {
        get_json(&self.nodes, node_id.as_bytes())
    }

    fn save_node(&self, node: &NodeInfo) -> Result<(), StorageError> {
        put_json(&self.nodes, node.id.as_bytes(), node)
    }

    fn list_nodes(&self) -> Result<NodeCollection, StorageError> {
        let nodes: Vec<NodeInfo> = scan_json(&self.nodes)?;
        Ok(nodes.into_iter().collect())
    }

    fn get_runtime_settings(&self) -> Result<Option<RuntimeSettings>, StorageError> {
        get_json(&self.runtime, RUNTIME_KEY)
    }

    fn save_runtime_settings(&self, settings: &RuntimeSettings) -> Result<(), StorageError> {
        put_json(&self.runtime, RUNTIME_KEY, settings)
    }
}
