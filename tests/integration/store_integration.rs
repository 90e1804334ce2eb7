//! Engine runs against the sled-backed store

use super::test_utils::{node_collection, node_step};
use clusterflow::bus::{MemoryBus, ReplyEnvelope};
use clusterflow::config::EngineConfig;
use clusterflow::engine::{completion_for, Engine, StepRegistry};
use clusterflow::operation::{Cluster, ClusterStatus, Operation, OperationKind, OperationStatus, Step};
use clusterflow::store::{RuntimeSettings, SledStateStore, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_run_persists_operation_and_cluster() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store");

    {
        let store = Arc::new(SledStateStore::open(&path).unwrap());
        let bus = MemoryBus::shared();
        bus.on_node("n1", |env| Some(ReplyEnvelope::success("n1", env.operation_id.clone()).with_data("0", "10.0.0.1")));
        let engine = Engine::from_config(
            &EngineConfig::default(),
            bus,
            store.clone(),
            StepRegistry::shared(),
        )
        .unwrap();

        let op = Operation::new("op-1", "c-1", "create-cluster")
            .with_step(Step::new("s0", "bootstrap").with_node_step(node_step("boot", "n1")));
        let completion = completion_for(OperationKind::CreateCluster, &op).unwrap();
        let outcome = engine
            .run(op, Cluster::new("c-1", "demo"), node_collection(&["n1"]), completion)
            .await
            .unwrap();
        assert!(outcome.is_success());
        store.flush().unwrap();
    }

    let reopened = SledStateStore::open(&path).unwrap();
    let op = reopened.require_operation("op-1").unwrap();
    assert_eq!(op.status, OperationStatus::Successful);
    assert_eq!(op.step_return_data.get("0").map(String::as_str), Some("10.0.0.1"));
    let cluster = reopened.require_cluster("c-1").unwrap();
    assert_eq!(cluster.status, ClusterStatus::Running);
    assert_eq!(cluster.last_operation.as_deref(), Some("op-1"));
    assert_eq!(reopened.list_operations().unwrap().len(), 1);
}

#[tokio::test]
async fn test_runtime_settings_override_configuration() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SledStateStore::open(temp_dir.path().join("store")).unwrap());
    store
        .save_runtime_settings(&RuntimeSettings {
            resource_server_url: Some("http://10.0.0.9:8081".to_string()),
            node_timeout_secs: Some(7),
        })
        .unwrap();

    let bus = MemoryBus::shared();
    bus.on_node("n1", |env| Some(ReplyEnvelope::success("n1", env.operation_id.clone())));
    let engine = Engine::from_config(
        &EngineConfig::default(),
        bus.clone(),
        store.clone(),
        StepRegistry::shared(),
    )
    .unwrap();

    assert_eq!(engine.settings().node_timeout, Duration::from_secs(7));
    assert_eq!(engine.settings().resource_server_url, "http://10.0.0.9:8081");

    let op = Operation::new("op-rt", "c-1", "delete-cluster")
        .with_step(Step::new("s0", "teardown").with_node_step(node_step("down", "n1")));
    let completion = completion_for(OperationKind::DeleteCluster, &op).unwrap();
    engine
        .run(
            op,
            Cluster::new("c-1", "demo").with_status(ClusterStatus::Running),
            node_collection(&["n1"]),
            completion,
        )
        .await
        .unwrap();

    let sent = bus.sent();
    assert_eq!(sent[0].timeout, Duration::from_secs(7));
    assert_eq!(bus.envelopes_for("n1")[0].resource_server_url, "http://10.0.0.9:8081");
    assert_eq!(
        store.require_cluster("c-1").unwrap().status,
        OperationKind::DeleteCluster.done_status()
    );
}

#[test]
fn test_invalid_engine_config_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SledStateStore::open(temp_dir.path().join("store")).unwrap());
    let config = EngineConfig {
        timeout_threshold: 0,
        ..EngineConfig::default()
    };

    let result = Engine::from_config(&config, MemoryBus::shared(), store, StepRegistry::shared());
    assert!(result.is_err());
}
