//! Integration tests for step execution

use super::test_utils::{node_step, Harness};
use clusterflow::bus::ReplyEnvelope;
use clusterflow::engine::{completion_for, BarrierMode, Completion, ResultCapture};
use clusterflow::error::EngineError;
use clusterflow::operation::{
    Cluster, ClusterStatus, NodeStep, Operation, OperationKind, OperationStatus, ReturnData, Step,
};
use clusterflow::store::StateStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn create_completion(op: &Operation) -> Completion {
    completion_for(OperationKind::CreateCluster, op).unwrap()
}

#[tokio::test]
async fn test_scenario_generated_step_reads_carry_over() {
    let h = Harness::new();
    h.answering("n1", &[("0", "ok")]);
    let nodes = h.register_nodes(&["n1"]);
    h.registry.register_generator(
        "follow-up",
        |carry: &ReturnData, _cluster: &Cluster, _op: &Operation| -> Result<Vec<NodeStep>, EngineError> {
            if carry.get("0").map(String::as_str) == Some("ok") {
                Ok(vec![node_step("verify-n1", "n1")])
            } else {
                Ok(Vec::new())
            }
        },
    );

    let op = Operation::new("op-a", "c-1", "create-cluster")
        .with_step(Step::new("s0", "prepare").with_node_step(node_step("prep-n1", "n1")))
        .with_step(Step::new("s1", "verify").with_generator("follow-up"));
    let completion = create_completion(&op);

    let outcome = h
        .engine
        .run(op, Cluster::new("c-1", "demo"), nodes, completion)
        .await
        .unwrap();

    assert_eq!(outcome.operation.status, OperationStatus::Successful);
    assert_eq!(outcome.operation.current_step, 1);
    assert_eq!(outcome.operation.owner_host, "cp-test");
    assert_eq!(outcome.operation.step_return_data.get("0").map(String::as_str), Some("ok"));
    assert_eq!(outcome.cluster.status, ClusterStatus::Running);
    assert_eq!(h.bus.envelopes_for("n1").len(), 2);

    let saved = h.store.require_operation("op-a").unwrap();
    assert_eq!(saved.status, OperationStatus::Successful);
    assert_eq!(saved.step(1).unwrap().node_steps.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_timeout_fails_operation_and_compensates() {
    let h = Harness::new();
    h.answering("n1", &[]);
    h.silent("n2");
    let nodes = h.register_nodes(&["n1", "n2"]);

    let op = Operation::new("op-b", "c-1", "create-cluster").with_step(
        Step::new("s0", "install")
            .with_node_step(node_step("install-n1", "n1"))
            .with_node_step(node_step("install-n2", "n2"))
            .with_timeout_threshold(1),
    );
    let completion = create_completion(&op);

    let outcome = h
        .engine
        .run(op, Cluster::new("c-1", "demo"), nodes, completion)
        .await
        .unwrap();

    assert_eq!(outcome.operation.status, OperationStatus::Error);
    assert_eq!(outcome.operation.current_step, 0);
    assert!(matches!(
        outcome.failure,
        Some(EngineError::Timeout { ref node_id, .. }) if node_id == "n2"
    ));
    assert!(outcome
        .operation
        .logs
        .iter()
        .any(|entry| entry.node_id.as_deref() == Some("n2") && entry.message.contains("timed out")));
    assert_eq!(outcome.cluster.status, ClusterStatus::Error);

    let saved_cluster = h.store.require_cluster("c-1").unwrap();
    assert_eq!(saved_cluster.status, ClusterStatus::Error);
    assert_eq!(h.store.require_operation("op-b").unwrap().status, OperationStatus::Error);
}

#[tokio::test]
async fn test_empty_step_is_skipped() {
    let h = Harness::new();
    h.answering("n1", &[]);
    let nodes = h.register_nodes(&["n1"]);
    h.registry.register_generator(
        "nothing",
        |_: &ReturnData, _: &Cluster, _: &Operation| -> Result<Vec<NodeStep>, EngineError> { Ok(Vec::new()) },
    );

    let op = Operation::new("op-empty", "c-1", "create-cluster")
        .with_step(Step::new("s0", "first").with_node_step(node_step("a", "n1")))
        .with_step(Step::new("s1", "expand-nothing").with_generator("nothing"))
        .with_step(Step::new("s2", "last").with_node_step(node_step("c", "n1")));

    let outcome = h
        .engine
        .run(op, Cluster::new("c-1", "demo"), nodes, Completion::noop())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.operation.current_step, 2);
    assert_eq!(h.bus.sent_count(), 2);
}

#[tokio::test]
async fn test_failed_step_index_is_kept_and_resume_restarts_there() {
    let h = Harness::new();
    h.answering("n1", &[]);
    let failed_once = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&failed_once);
    h.bus.on_node("n2", move |env| {
        if flag.swap(true, Ordering::SeqCst) {
            Some(ReplyEnvelope::success("n2", env.operation_id.clone()))
        } else {
            Some(ReplyEnvelope::error("n2", env.operation_id.clone(), "kubelet not ready"))
        }
    });
    let nodes = h.register_nodes(&["n1", "n2"]);

    let op = Operation::new("op-r", "c-1", "create-cluster")
        .with_step(Step::new("s0", "prepare").with_node_step(node_step("prep-n1", "n1")))
        .with_step(Step::new("s1", "join").with_node_step(node_step("join-n2", "n2")))
        .with_step(Step::new("s2", "finish").with_node_step(node_step("finish-n1", "n1")));
    let completion = create_completion(&op);

    let outcome = h
        .engine
        .run(op, Cluster::new("c-1", "demo"), nodes, completion)
        .await
        .unwrap();
    assert_eq!(outcome.operation.status, OperationStatus::Error);
    assert_eq!(outcome.operation.current_step, 1);
    assert!(matches!(outcome.failure, Some(EngineError::Remote { ref message, .. }) if message == "kubelet not ready"));

    let resumed = h.engine.resume("op-r").unwrap().await.unwrap();
    assert!(resumed.is_success());
    assert_eq!(resumed.operation.current_step, 2);
    assert_eq!(resumed.cluster.status, ClusterStatus::Running);

    let prep_runs = h
        .bus
        .envelopes_for("n1")
        .iter()
        .filter(|env| env.node_step_id == "prep-n1")
        .count();
    assert_eq!(prep_runs, 1, "resume must not re-run completed steps");
    assert_eq!(h.bus.envelopes_for("n2").len(), 2);
}

#[tokio::test]
async fn test_single_error_resolves_step_without_waiting() {
    let h = Harness::new();
    h.bus.on_node("n1", |env| Some(ReplyEnvelope::error("n1", env.operation_id.clone(), "disk full")));
    h.silent("n2");
    h.silent("n3");
    let nodes = h.register_nodes(&["n1", "n2", "n3"]);

    let op = Operation::new("op-e", "c-1", "create-cluster").with_step(
        Step::new("s0", "install")
            .with_node_step(node_step("a", "n1"))
            .with_node_step(node_step("b", "n2"))
            .with_node_step(node_step("c", "n3")),
    );

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        h.engine.run(op, Cluster::new("c-1", "demo"), nodes, Completion::noop()),
    )
    .await
    .expect("error reply must resolve the step before node timeouts")
    .unwrap();

    assert!(matches!(outcome.failure, Some(EngineError::Remote { ref node_id, .. }) if node_id == "n1"));
}

#[tokio::test(start_paused = true)]
async fn test_success_waits_for_every_node() {
    let h = Harness::new();
    let next_step_sent: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let recorded = Arc::clone(&next_step_sent);
    h.bus.on_node("n1", move |env| {
        if env.node_step_id == "d" {
            *recorded.lock() = Some(Instant::now());
        }
        Some(ReplyEnvelope::success("n1", env.operation_id.clone()))
    });
    h.answering("n2", &[]);
    h.answering("n3", &[]);
    h.bus.with_latency("n3", Duration::from_millis(150));
    let nodes = h.register_nodes(&["n1", "n2", "n3"]);

    let op = Operation::new("op-k", "c-1", "create-cluster")
        .with_step(
            Step::new("s0", "install")
                .with_node_step(node_step("a", "n1"))
                .with_node_step(node_step("b", "n2"))
                .with_node_step(node_step("c", "n3")),
        )
        .with_step(Step::new("s1", "after").with_node_step(node_step("d", "n1")));

    let started = Instant::now();
    let outcome = h
        .engine
        .run(op, Cluster::new("c-1", "demo"), nodes, Completion::noop())
        .await
        .unwrap();
    assert!(outcome.is_success());

    let sent_at = next_step_sent.lock().expect("next step was never sent");
    assert!(
        sent_at.duration_since(started) >= Duration::from_millis(150),
        "next step went out before the slowest node answered"
    );
    assert_eq!(h.bus.sent_count(), 4);
}

#[tokio::test]
async fn test_wait_for_first_mode_resolves_on_first_answer() {
    let h = Harness::new();
    h.answering("n1", &[]);
    h.silent("n2");
    let nodes = h.register_nodes(&["n1", "n2"]);

    let op = Operation::new("op-first", "c-1", "create-cluster").with_step(
        Step::new("s0", "preflight")
            .with_node_step(node_step("a", "n1"))
            .with_node_step(node_step("b", "n2"))
            .with_barrier_mode(BarrierMode::WaitForFirst),
    );

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        h.engine.run(op, Cluster::new("c-1", "demo"), nodes, Completion::noop()),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_untouched_carry_over_reaches_next_step() {
    let h = Harness::new();
    h.answering("n1", &[("1", "{\"ports\":[6443]}")]);
    let nodes = h.register_nodes(&["n1"]);

    let mut op = Operation::new("op-c", "c-1", "create-cluster")
        .with_step(Step::new("s0", "preflight").with_node_step(node_step("a", "n1")))
        .with_step(Step::new("s1", "use").with_node_step(node_step("b", "n1")));
    op.step_return_data.insert("0".to_string(), "preflight-ok".to_string());

    h.engine
        .run(op, Cluster::new("c-1", "demo"), nodes, Completion::noop())
        .await
        .unwrap();

    let envelopes = h.bus.envelopes_for("n1");
    let second = envelopes.iter().find(|env| env.node_step_id == "b").unwrap();
    assert_eq!(second.step_return_data.get("0").map(String::as_str), Some("preflight-ok"));
    assert_eq!(second.step_return_data.get("1").map(String::as_str), Some("{\"ports\":[6443]}"));
    assert_eq!(second.task_type, "create-cluster");
    assert_eq!(second.cluster, "c-1");
}

#[tokio::test]
async fn test_unknown_node_fails_step_without_dispatch() {
    let h = Harness::new();
    let nodes = h.register_nodes(&["n1"]);
    let op = Operation::new("op-x", "c-1", "create-cluster")
        .with_step(Step::new("s0", "install").with_node_step(node_step("a", "ghost")));

    let outcome = h
        .engine
        .run(op, Cluster::new("c-1", "demo"), nodes, Completion::noop())
        .await
        .unwrap();
    assert!(matches!(outcome.failure, Some(EngineError::Dispatch { ref node_id, .. }) if node_id == "ghost"));
    assert_eq!(h.bus.sent_count(), 0);
}

#[tokio::test]
async fn test_unknown_policy_fails_before_dispatch() {
    let h = Harness::new();
    h.answering("n1", &[]);
    let nodes = h.register_nodes(&["n1"]);
    let op = Operation::new("op-p", "c-1", "create-cluster").with_step(
        Step::new("s0", "install")
            .with_node_step(node_step("a", "n1"))
            .with_reply_policy("no-such-policy"),
    );

    let outcome = h
        .engine
        .run(op, Cluster::new("c-1", "demo"), nodes, Completion::noop())
        .await
        .unwrap();
    assert!(matches!(outcome.failure, Some(EngineError::ConfigError(_))));
    assert_eq!(h.bus.sent_count(), 0);
}

#[tokio::test]
async fn test_result_capture_collects_every_answer() {
    let h = Harness::new();
    h.answering("n1", &[("0", "22,6443")]);
    h.bus.on_node("n2", |env| Some(ReplyEnvelope::error("n2", env.operation_id.clone(), "agent busy")));
    let nodes = h.register_nodes(&["n1", "n2"]);

    let (capture, mut results) = ResultCapture::channel();
    h.registry.register_policy("capture:op-q", capture);
    let op = Operation::new("op-q", "c-1", "backup-cluster").with_step(
        Step::new("s0", "ports")
            .with_node_step(node_step("a", "n1"))
            .with_node_step(node_step("b", "n2"))
            .with_reply_policy("capture:op-q")
            .with_timeout_policy("capture:op-q"),
    );

    let outcome = h
        .engine
        .run(op, Cluster::new("c-1", "demo"), nodes, Completion::noop())
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert!(h.registry.unregister_policy("capture:op-q"));

    let mut answered = Vec::new();
    while let Ok(result) = results.try_recv() {
        answered.push((result.node_id, result.reply.map(|r| r.is_success())));
    }
    answered.sort();
    assert_eq!(
        answered,
        vec![("n1".to_string(), Some(true)), ("n2".to_string(), Some(false))]
    );
}

#[tokio::test]
async fn test_start_claims_operation_until_done() {
    let h = Harness::new();
    h.answering("n1", &[]);
    h.bus.with_latency("n1", Duration::from_millis(100));
    let nodes = h.register_nodes(&["n1"]);
    let op = Operation::new("op-s", "c-1", "create-cluster")
        .with_step(Step::new("s0", "install").with_node_step(node_step("a", "n1")));

    let handle = h
        .engine
        .start(op.clone(), Cluster::new("c-1", "demo"), nodes.clone(), Completion::noop())
        .unwrap();
    assert!(h.engine.is_running("op-s"));
    let err = h
        .engine
        .start(op, Cluster::new("c-1", "demo"), nodes, Completion::noop())
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRunning(_)));

    let outcome = handle.await.unwrap();
    assert!(outcome.is_success());
    assert!(!h.engine.is_running("op-s"));
}

#[tokio::test]
async fn test_in_flight_set_cleared_on_success() {
    let h = Harness::new();
    h.answering("n1", &[]);
    let nodes = h.register_nodes(&["n1"]);
    let op = Operation::new("op-f", "c-1", "add-nodes")
        .with_param("nodes", r#"["n4"]"#)
        .with_step(Step::new("s0", "join").with_node_step(node_step("a", "n1")));
    let completion = completion_for(OperationKind::AddNodes, &op).unwrap();

    let outcome = h
        .engine
        .run(op, Cluster::new("c-1", "demo").with_nodes(["n1"]), nodes, completion)
        .await
        .unwrap();

    assert!(outcome.cluster.pending_operations.is_empty());
    assert_eq!(outcome.cluster.last_operation.as_deref(), Some("op-f"));
    assert!(outcome.cluster.nodes.contains("n4"));
}
