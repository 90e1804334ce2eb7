//! Cluster and node snapshots an operation runs against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterStatus {
    Installing,
    Running,
    Updating,
    Upgrading,
    BackingUp,
    Restoring,
    Terminating,
    Terminated,
    Error,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Installing => "installing",
            ClusterStatus::Running => "running",
            ClusterStatus::Updating => "updating",
            ClusterStatus::Upgrading => "upgrading",
            ClusterStatus::BackingUp => "backing-up",
            ClusterStatus::Restoring => "restoring",
            ClusterStatus::Terminating => "terminating",
            ClusterStatus::Terminated => "terminated",
            ClusterStatus::Error => "error",
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub status: ClusterStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Member node ids.
    #[serde(default)]
    pub nodes: BTreeSet<String>,
    /// Operations currently in flight against this cluster.
    #[serde(default)]
    pub pending_operations: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ClusterStatus::Installing,
            version: None,
            nodes: BTreeSet::new(),
            pending_operations: BTreeSet::new(),
            last_operation: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: ClusterStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn set_status(&mut self, status: ClusterStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn track_operation(&mut self, operation_id: &str) {
        self.pending_operations.insert(operation_id.to_string());
        self.updated_at = Utc::now();
    }

    /// Remove an operation from the in-flight set and remember it as the last one.
    pub fn finish_operation(&mut self, operation_id: &str) -> bool {
        let removed = self.pending_operations.remove(operation_id);
        self.last_operation = Some(operation_id.to_string());
        self.updated_at = Utc::now();
        removed
    }

    pub fn add_nodes(&mut self, node_ids: &[String]) {
        self.nodes.extend(node_ids.iter().cloned());
        self.updated_at = Utc::now();
    }

    pub fn remove_nodes(&mut self, node_ids: &[String]) {
        for id in node_ids {
            self.nodes.remove(id);
        }
        self.updated_at = Utc::now();
    }
}

/// A node agent as known to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInfo {
    pub id: String,
    pub hostname: String,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NodeInfo {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            ip: ip.into(),
            cluster_id: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn in_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = Some(cluster_id.into());
        self
    }
}

/// Snapshot of known nodes, keyed by node id. Dispatch resolves targets here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeCollection {
    nodes: BTreeMap<String, NodeInfo>,
}

impl NodeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeInfo> {
        self.nodes.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn insert(&mut self, node: NodeInfo) -> Option<NodeInfo> {
        self.nodes.insert(node.id.clone(), node)
    }

    pub fn remove(&mut self, node_id: &str) -> Option<NodeInfo> {
        self.nodes.remove(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }
}

impl FromIterator<NodeInfo> for NodeCollection {
    fn from_iter<T: IntoIterator<Item = NodeInfo>>(iter: T) -> Self {
        let mut collection = NodeCollection::new();
        for node in iter {
            collection.insert(node);
        }
        collection
    }
}
