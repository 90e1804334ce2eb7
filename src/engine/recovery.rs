//! Recovery coordinator.
//!
//! Rebuilds the completion callbacks of a persisted operation from its type tag and
//! captured parameters, then puts the operation and its cluster back in flight. All
//! validation happens before the first mutation: a failed recovery leaves both
//! records exactly as they were.

use crate::engine::executor::Completion;
use crate::error::RecoveryError;
use crate::operation::{Cluster, ClusterStatus, Operation, OperationKind, OperationStatus};
use tracing::info;

/// Completion callbacks for an operation of `kind`, built from its parameters.
pub fn completion_for(kind: OperationKind, operation: &Operation) -> Result<Completion, RecoveryError> {
    for key in kind.required_params() {
        let present = operation.param(key).is_some_and(|v| !v.trim().is_empty());
        if !present {
            return Err(RecoveryError::MissingParameter {
                kind: kind.tag().to_string(),
                key: (*key).to_string(),
            });
        }
    }

    let on_error = move |op: &mut Operation, cluster: &mut Cluster, err: &crate::error::EngineError| {
        let status = kind.error_status();
        cluster.set_status(status);
        op.log(
            Some(op.current_step),
            None,
            format!("{} failed ({}); cluster {} marked {}", kind, err, cluster.id, status),
        );
    };

    let completion = match kind {
        OperationKind::AddNodes => {
            let nodes = node_list(operation)?;
            Completion::new(
                move |op, cluster| {
                    cluster.add_nodes(&nodes);
                    finish(kind, op, cluster);
                },
                on_error,
            )
        }
        OperationKind::RemoveNodes => {
            let nodes = node_list(operation)?;
            Completion::new(
                move |op, cluster| {
                    cluster.remove_nodes(&nodes);
                    finish(kind, op, cluster);
                },
                on_error,
            )
        }
        OperationKind::UpgradeCluster => {
            let version = operation.param("version").unwrap_or_default().to_string();
            Completion::new(
                move |op, cluster| {
                    cluster.version = Some(version);
                    finish(kind, op, cluster);
                },
                on_error,
            )
        }
        _ => Completion::new(move |op, cluster| finish(kind, op, cluster), on_error),
    };
    Ok(completion)
}

fn finish(kind: OperationKind, operation: &mut Operation, cluster: &mut Cluster) {
    let status: ClusterStatus = kind.done_status();
    cluster.set_status(status);
    cluster.last_operation = Some(operation.id.clone());
    operation.log(None, None, format!("cluster {} is {}", cluster.id, status));
}

fn node_list(operation: &Operation) -> Result<Vec<String>, RecoveryError> {
    let raw = operation.param("nodes").unwrap_or_default();
    serde_json::from_str::<Vec<String>>(raw).map_err(|e| RecoveryError::InvalidParameter {
        key: "nodes".to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryCoordinator;

impl RecoveryCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Reconstruct an operation's completion callbacks and mark it in flight again.
    ///
    /// Operations in `error` are recoverable, and so are `processing` ones left
    /// behind by a crashed host. Successful operations are not.
    pub fn recover(
        &self,
        operation: &mut Operation,
        cluster: &mut Cluster,
    ) -> Result<Completion, RecoveryError> {
        let kind: OperationKind = operation.op_type.parse()?;
        if operation.status == OperationStatus::Successful {
            return Err(RecoveryError::NotRecoverable {
                operation_id: operation.id.clone(),
                status: operation.status.to_string(),
            });
        }
        let completion = completion_for(kind, operation)?;

        operation.set_status(OperationStatus::Processing);
        operation.log(
            Some(operation.current_step),
            None,
            format!("resuming {} at step {}", kind, operation.current_step),
        );
        cluster.set_status(kind.in_flight_status());
        cluster.track_operation(&operation.id);

        info!(
            operation_id = %operation.id,
            cluster_id = %cluster.id,
            kind = %kind,
            step = operation.current_step,
            "Operation recovered"
        );
        Ok(completion)
    }
}
