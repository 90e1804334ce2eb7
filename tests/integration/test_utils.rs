//! Shared test utilities for integration tests
//!
//! Builds engines over the in-memory bus and store so scenarios can script node
//! behaviour without a live transport.

use clusterflow::bus::{MemoryBus, ReplyEnvelope};
use clusterflow::engine::{Engine, EngineSettings, ExecutionContext, StepRegistry};
use clusterflow::operation::{NodeCollection, NodeInfo, NodeStep, Task};
use clusterflow::store::{MemoryStateStore, StateStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub bus: Arc<MemoryBus>,
    pub store: Arc<MemoryStateStore>,
    pub registry: Arc<StepRegistry>,
    pub engine: Engine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let bus = MemoryBus::shared();
        let store = MemoryStateStore::shared();
        let registry = StepRegistry::shared();
        let ctx = ExecutionContext::new(bus.clone(), store.clone(), Arc::clone(&registry), settings);
        Self {
            bus,
            store,
            registry,
            engine: Engine::new(ctx),
        }
    }

    /// Nodes that answer every task successfully with `data` as results.
    pub fn answering(&self, node_id: &str, data: &[(&str, &str)]) {
        let node = node_id.to_string();
        let data: Vec<(String, String)> = data
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.bus.on_node(node_id, move |env| {
            let mut reply = ReplyEnvelope::success(node.clone(), env.operation_id.clone());
            for (k, v) in &data {
                reply = reply.with_data(k.clone(), v.clone());
            }
            Some(reply)
        });
    }

    /// Nodes that never answer.
    pub fn silent(&self, node_id: &str) {
        self.bus.on_node(node_id, |_| None);
    }

    /// Register every node in the store, and return them as a collection.
    pub fn register_nodes(&self, ids: &[&str]) -> NodeCollection {
        let nodes = node_collection(ids);
        for node in nodes.iter() {
            self.store.save_node(node).unwrap();
        }
        nodes
    }
}

pub fn test_settings() -> EngineSettings {
    EngineSettings {
        host_id: "cp-test".to_string(),
        node_timeout: Duration::from_secs(5),
        ..EngineSettings::default()
    }
}

pub fn node_collection(ids: &[&str]) -> NodeCollection {
    ids.iter()
        .enumerate()
        .map(|(i, id)| NodeInfo::new(*id, format!("{}.cluster.local", id), format!("10.0.0.{}", i + 1)))
        .collect()
}

pub fn node_step(id: &str, node_id: &str) -> NodeStep {
    NodeStep::new(id, node_id, Task::new("run", json!({ "node_step": id })))
}
