//! Operation model: the persisted multi-step plan, the cluster and node snapshots it
//! runs against, and the closed set of operation kinds.

pub mod cluster;
pub mod kind;
pub mod model;

pub use cluster::{Cluster, ClusterStatus, NodeCollection, NodeInfo};
pub use kind::OperationKind;
pub use model::{
    NodeStep, Operation, OperationLog, OperationStatus, ReturnData, Step, Task,
};
