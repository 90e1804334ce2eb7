//! Node dispatcher: sends one task to one node and reports exactly one outcome.

use crate::bus::{BusError, BusRequest, MessageBus, ReplyEnvelope, TaskEnvelope};
use crate::error::EngineError;
use crate::operation::NodeCollection;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The single outcome of one dispatch.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Reply {
        correlation_id: String,
        reply: ReplyEnvelope,
    },
    Timeout {
        node_id: String,
        correlation_id: String,
    },
}

impl DispatchOutcome {
    pub fn correlation_id(&self) -> &str {
        match self {
            DispatchOutcome::Reply { correlation_id, .. } => correlation_id,
            DispatchOutcome::Timeout { correlation_id, .. } => correlation_id,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchOutcome::Timeout { .. })
    }
}

/// Receives dispatch outcomes. Called from the dispatch task, possibly
/// concurrently with other outcomes of the same step.
pub trait OutcomeSink: Send + Sync {
    fn deliver(self: Arc<Self>, outcome: DispatchOutcome);
}

#[derive(Clone)]
pub struct NodeDispatcher {
    bus: Arc<dyn MessageBus>,
    subject: String,
    sender_id: String,
}

impl NodeDispatcher {
    pub fn new(bus: Arc<dyn MessageBus>, subject: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            bus,
            subject: subject.into(),
            sender_id: sender_id.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Send `envelope` to `target_id` and deliver the outcome to `sink` from a
    /// spawned task.
    ///
    /// A target missing from `nodes`, or an envelope that cannot be encoded, is
    /// reported synchronously and the bus is never called.
    pub fn dispatch(
        &self,
        nodes: &NodeCollection,
        target_id: &str,
        correlation_id: &str,
        envelope: &TaskEnvelope,
        timeout: Duration,
        sink: Arc<dyn OutcomeSink>,
    ) -> Result<JoinHandle<()>, EngineError> {
        let node = nodes.get(target_id).ok_or_else(|| EngineError::Dispatch {
            node_id: target_id.to_string(),
            reason: "node not found in node collection".to_string(),
        })?;
        let payload = serde_json::to_vec(envelope).map_err(|e| EngineError::Dispatch {
            node_id: target_id.to_string(),
            reason: format!("failed to encode task envelope: {}", e),
        })?;

        let request = BusRequest {
            subject: self.subject.clone(),
            sender_id: self.sender_id.clone(),
            target_id: node.id.clone(),
            correlation_id: correlation_id.to_string(),
            timeout,
            payload,
        };
        debug!(
            operation_id = %envelope.operation_id,
            node_id = %node.id,
            correlation_id = %correlation_id,
            timeout_ms = timeout.as_millis() as u64,
            "Dispatching node task"
        );

        let bus = Arc::clone(&self.bus);
        let operation_id = envelope.operation_id.clone();
        Ok(tokio::spawn(async move {
            let outcome = exchange(bus.as_ref(), request, &operation_id).await;
            sink.deliver(outcome);
        }))
    }
}

async fn exchange(bus: &dyn MessageBus, request: BusRequest, operation_id: &str) -> DispatchOutcome {
    let node_id = request.target_id.clone();
    let correlation_id = request.correlation_id.clone();
    let timeout = request.timeout;
    let timed_out = |node_id: String, correlation_id: String| DispatchOutcome::Timeout {
        node_id,
        correlation_id,
    };

    match tokio::time::timeout(timeout, bus.send_with_reply(request)).await {
        Err(_) | Ok(Err(BusError::Timeout(_))) => timed_out(node_id, correlation_id),
        Ok(Err(BusError::Transport(reason))) => {
            warn!(
                node_id = %node_id,
                correlation_id = %correlation_id,
                reason = %reason,
                "Transport failure, treating as timeout"
            );
            timed_out(node_id, correlation_id)
        }
        Ok(Ok(raw)) => match serde_json::from_slice::<ReplyEnvelope>(&raw) {
            Ok(reply) => DispatchOutcome::Reply {
                correlation_id,
                reply,
            },
            Err(e) => {
                warn!(node_id = %node_id, error = %e, "Undecodable reply from node");
                DispatchOutcome::Reply {
                    correlation_id,
                    reply: ReplyEnvelope::error(
                        node_id,
                        operation_id,
                        format!("undecodable reply: {}", e),
                    ),
                }
            }
        },
    }
}
