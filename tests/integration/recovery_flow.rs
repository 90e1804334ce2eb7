//! Recovery and resume of persisted operations

use super::test_utils::{node_step, Harness};
use clusterflow::bus::ReplyEnvelope;
use clusterflow::engine::completion_for;
use clusterflow::error::{EngineError, RecoveryError, StorageError};
use clusterflow::operation::{Cluster, ClusterStatus, Operation, OperationKind, OperationStatus, Step};
use clusterflow::store::StateStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn failed_operation(op_type: &str) -> Operation {
    let mut op = Operation::new("op-1", "c-1", op_type)
        .with_step(Step::new("s0", "prepare").with_node_step(node_step("a", "n1")));
    op.set_status(OperationStatus::Error);
    op
}

#[test]
fn test_unsupported_type_leaves_state_unchanged() {
    let h = Harness::new();
    let mut op = failed_operation("defragment-cluster");
    let mut cluster = Cluster::new("c-1", "demo").with_status(ClusterStatus::Error);
    let (op_before, cluster_before) = (op.clone(), cluster.clone());

    let err = h.engine.recover(&mut op, &mut cluster).unwrap_err();

    assert!(matches!(
        err,
        EngineError::Recovery(RecoveryError::UnsupportedType(ref t)) if t == "defragment-cluster"
    ));
    assert_eq!(op, op_before);
    assert_eq!(cluster, cluster_before);
}

#[test]
fn test_missing_parameter_leaves_state_unchanged() {
    let h = Harness::new();
    let mut op = failed_operation("upgrade-cluster");
    let mut cluster = Cluster::new("c-1", "demo").with_status(ClusterStatus::Error);
    let op_before = op.clone();

    let err = h.engine.recover(&mut op, &mut cluster).unwrap_err();

    assert!(matches!(
        err,
        EngineError::Recovery(RecoveryError::MissingParameter { ref key, .. }) if key == "version"
    ));
    assert_eq!(op, op_before);
    assert!(cluster.pending_operations.is_empty());
    assert_eq!(cluster.status, ClusterStatus::Error);
}

#[test]
fn test_malformed_node_list_is_rejected() {
    let h = Harness::new();
    let mut op = failed_operation("remove-nodes").with_param("nodes", "n3,n4");
    let mut cluster = Cluster::new("c-1", "demo");

    let err = h.engine.recover(&mut op, &mut cluster).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Recovery(RecoveryError::InvalidParameter { ref key, .. }) if key == "nodes"
    ));
    assert_eq!(op.status, OperationStatus::Error);
}

#[test]
fn test_recover_puts_cluster_back_in_flight() {
    let h = Harness::new();
    let mut op = failed_operation("backup-cluster").with_param("backup_name", "nightly");
    let mut cluster = Cluster::new("c-1", "demo").with_status(ClusterStatus::Error);

    h.engine.recover(&mut op, &mut cluster).unwrap();

    assert_eq!(op.status, OperationStatus::Processing);
    assert_eq!(cluster.status, ClusterStatus::BackingUp);
    assert!(cluster.pending_operations.contains("op-1"));
    assert!(op.logs.last().unwrap().message.contains("resuming"));
}

#[test]
fn test_crashed_processing_operation_is_recoverable() {
    let h = Harness::new();
    let mut op = failed_operation("delete-cluster");
    op.set_status(OperationStatus::Processing);
    let mut cluster = Cluster::new("c-1", "demo");

    assert!(h.engine.recover(&mut op, &mut cluster).is_ok());
    assert_eq!(cluster.status, ClusterStatus::Terminating);
}

#[test]
fn test_resume_requires_failed_operation() {
    let h = Harness::new();
    let mut op = failed_operation("create-cluster");
    op.set_status(OperationStatus::Successful);
    h.store.save_operation(&op).unwrap();

    let err = h.engine.resume("op-1").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Recovery(RecoveryError::NotRecoverable { .. })
    ));

    let err = h.engine.resume("op-missing").unwrap_err();
    assert!(matches!(err, EngineError::Storage(StorageError::NotFound { .. })));
}

#[tokio::test]
async fn test_resume_continues_upgrade_after_node_recovers() {
    let h = Harness::new();
    h.answering("n1", &[]);
    let healthy = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&healthy);
    h.bus.on_node("n2", move |env| {
        if gate.load(Ordering::SeqCst) {
            Some(ReplyEnvelope::success("n2", env.operation_id.clone()))
        } else {
            Some(ReplyEnvelope::error("n2", env.operation_id.clone(), "image pull failed"))
        }
    });
    let nodes = h.register_nodes(&["n1", "n2"]);

    let op = Operation::new("op-up", "c-1", "upgrade-cluster")
        .with_param("version", "1.29.4")
        .with_step(Step::new("s0", "drain").with_node_step(node_step("drain-n1", "n1")))
        .with_step(Step::new("s1", "upgrade").with_node_step(node_step("upgrade-n2", "n2")));
    let completion = completion_for(OperationKind::UpgradeCluster, &op).unwrap();
    let cluster = Cluster::new("c-1", "demo")
        .with_status(ClusterStatus::Upgrading)
        .with_nodes(["n1", "n2"]);

    let first = h.engine.run(op, cluster, nodes, completion).await.unwrap();
    assert_eq!(first.operation.status, OperationStatus::Error);
    assert_eq!(first.operation.current_step, 1);
    assert_eq!(first.cluster.status, OperationKind::UpgradeCluster.error_status());
    assert!(first.cluster.version.is_none());

    healthy.store(true, Ordering::SeqCst);
    let resumed = h.engine.resume("op-up").unwrap().await.unwrap();

    assert!(resumed.is_success());
    assert_eq!(resumed.cluster.version.as_deref(), Some("1.29.4"));
    assert_eq!(resumed.cluster.status, OperationKind::UpgradeCluster.done_status());
    assert!(resumed.cluster.pending_operations.is_empty());
    assert_eq!(h.bus.envelopes_for("n1").len(), 1);

    let stored = h.store.require_operation("op-up").unwrap();
    assert_eq!(stored.status, OperationStatus::Successful);
    assert!(stored.logs.iter().any(|entry| entry.message.contains("resuming")));
}
