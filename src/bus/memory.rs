//! In-process message bus for tests and embedding.
//!
//! Each node id maps to a responder closure. A responder returning `None` models an
//! agent that never answers; the request then waits out its timeout.

use crate::bus::envelope::{ReplyEnvelope, TaskEnvelope};
use crate::bus::{BusError, BusRequest, MessageBus};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type Responder = dyn Fn(&TaskEnvelope) -> Option<ReplyEnvelope> + Send + Sync;

#[derive(Default)]
pub struct MemoryBus {
    responders: RwLock<HashMap<String, Arc<Responder>>>,
    latencies: RwLock<HashMap<String, Duration>>,
    sent: Mutex<Vec<BusRequest>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register how `node_id` answers tasks.
    pub fn on_node<F>(&self, node_id: impl Into<String>, responder: F)
    where
        F: Fn(&TaskEnvelope) -> Option<ReplyEnvelope> + Send + Sync + 'static,
    {
        self.responders
            .write()
            .insert(node_id.into(), Arc::new(responder));
    }

    /// Delay every reply from `node_id`.
    pub fn with_latency(&self, node_id: impl Into<String>, latency: Duration) {
        self.latencies.write().insert(node_id.into(), latency);
    }

    /// Requests seen so far, in send order.
    pub fn sent(&self) -> Vec<BusRequest> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Decoded task envelopes sent to `node_id`.
    pub fn envelopes_for(&self, node_id: &str) -> Vec<TaskEnvelope> {
        self.sent
            .lock()
            .iter()
            .filter(|request| request.target_id == node_id)
            .filter_map(|request| serde_json::from_slice(&request.payload).ok())
            .collect()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn send_with_reply(&self, request: BusRequest) -> Result<Vec<u8>, BusError> {
        self.sent.lock().push(request.clone());

        let envelope: TaskEnvelope = serde_json::from_slice(&request.payload)
            .map_err(|e| BusError::Transport(format!("undecodable task payload: {}", e)))?;
        let responder = self.responders.read().get(&request.target_id).cloned();
        let latency = self.latencies.read().get(&request.target_id).copied();

        let reply = responder.and_then(|respond| respond(&envelope));
        let Some(reply) = reply else {
            debug!(
                target_id = %request.target_id,
                correlation_id = %request.correlation_id,
                "Memory bus node stays silent"
            );
            tokio::time::sleep(request.timeout).await;
            return Err(BusError::Timeout(request.timeout));
        };

        if let Some(latency) = latency {
            if latency >= request.timeout {
                tokio::time::sleep(request.timeout).await;
                return Err(BusError::Timeout(request.timeout));
            }
            tokio::time::sleep(latency).await;
        }

        serde_json::to_vec(&reply).map_err(|e| BusError::Transport(e.to_string()))
    }
}
