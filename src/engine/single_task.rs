//! Single-task runner: one node, one task, one answer.
//!
//! Bypasses the barrier and the step policies. The outcome is written to the
//! operation's terminal status and handed straight back to the caller.

use crate::bus::TaskEnvelope;
use crate::engine::dispatcher::{DispatchOutcome, OutcomeSink};
use crate::engine::executor::ExecutionContext;
use crate::error::EngineError;
use crate::operation::{Cluster, NodeCollection, Operation, OperationStatus, ReturnData};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// Forwards the one outcome of the dispatch to the waiting caller.
struct OneshotSink {
    tx: Mutex<Option<oneshot::Sender<DispatchOutcome>>>,
}

impl OutcomeSink for OneshotSink {
    fn deliver(self: Arc<Self>, outcome: DispatchOutcome) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(outcome);
        }
    }
}

pub struct SingleTaskRunner {
    ctx: Arc<ExecutionContext>,
}

impl SingleTaskRunner {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    /// Send the operation's only task and wait for the node's answer.
    ///
    /// `timeout` overrides the step and engine timeouts.
    pub async fn run(
        &self,
        operation: &mut Operation,
        cluster: &Cluster,
        nodes: &NodeCollection,
        timeout: Option<Duration>,
    ) -> Result<ReturnData, EngineError> {
        let _claim = self.ctx.active.claim(&operation.id)?;
        operation.owner_host = self.ctx.settings.host_id.clone();
        let step = operation
            .step(0)
            .cloned()
            .ok_or_else(|| EngineError::InvalidOperation(format!("operation {} has no steps", operation.id)))?;
        let node_step = match step.node_steps.as_slice() {
            [only] => only.clone(),
            other => {
                return Err(EngineError::InvalidOperation(format!(
                    "single task operation {} needs exactly one node step, found {}",
                    operation.id,
                    other.len()
                )))
            }
        };
        let task = node_step.primary_task().cloned().ok_or_else(|| {
            EngineError::InvalidOperation(format!("node step {} has no task", node_step.id))
        })?;

        let settings = &self.ctx.settings;
        let timeout = timeout.unwrap_or_else(|| settings.node_timeout_for(&step));
        let envelope = TaskEnvelope {
            operation_id: operation.id.clone(),
            task_type: operation.op_type.clone(),
            cluster: cluster.id.clone(),
            resource_server_url: settings.resource_server_url.clone(),
            step_return_data: operation.step_return_data.clone(),
            node_step_id: node_step.id.clone(),
            task_data: task.data,
        };

        let (tx, rx) = oneshot::channel();
        let sink = Arc::new(OneshotSink {
            tx: Mutex::new(Some(tx)),
        });
        let dispatched = self.ctx.dispatcher.dispatch(
            nodes,
            &node_step.node_id,
            &node_step.id,
            &envelope,
            timeout,
            sink,
        );

        let result = match dispatched {
            Err(err) => Err(err),
            Ok(_) => match rx.await {
                Ok(DispatchOutcome::Reply { reply, .. }) if reply.is_success() => Ok(reply.return_data),
                Ok(DispatchOutcome::Reply { reply, .. }) => Err(EngineError::Remote {
                    node_id: node_step.node_id.clone(),
                    message: reply.message,
                }),
                Ok(DispatchOutcome::Timeout { node_id, correlation_id }) => Err(EngineError::Timeout {
                    node_id,
                    correlation_id,
                    attempts: 1,
                }),
                Err(_) => Err(EngineError::Dispatch {
                    node_id: node_step.node_id.clone(),
                    reason: "dispatch task ended without an outcome".to_string(),
                }),
            },
        };

        match &result {
            Ok(data) => {
                operation.merge_return_data(data);
                operation.set_status(OperationStatus::Successful);
                operation.log(Some(0), Some(&node_step.node_id), "task completed");
                info!(operation_id = %operation.id, node_id = %node_step.node_id, "Single task completed");
            }
            Err(err) => {
                operation.set_status(OperationStatus::Error);
                operation.log(Some(0), Some(&node_step.node_id), format!("task failed: {}", err));
                warn!(operation_id = %operation.id, node_id = %node_step.node_id, error = %err, "Single task failed");
            }
        }
        if let Err(err) = self.ctx.store.save_operation(operation) {
            error!(operation_id = %operation.id, error = %err, "Failed to persist single task result");
        }
        result
    }
}
