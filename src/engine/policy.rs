//! Step handler policies.
//!
//! A policy decides what one node-task callback means for its step: a terminal
//! success, a step failure, a re-send, or nothing. Counting terminal outcomes is the
//! barrier's job; policies only judge individual callbacks. Policies are stateless
//! and shared, per-node-task counters arrive through [`PolicyContext`].

use crate::bus::ReplyEnvelope;
use crate::engine::run_state::RunState;
use crate::error::EngineError;
use crate::operation::NodeStep;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const ABORT_ON_ERROR: &str = "abort-on-error";
pub const ABORT_ON_TIMEOUT_COUNT: &str = "abort-on-timeout-count";

#[derive(Debug)]
pub enum PolicyVerdict {
    /// One terminal, successful outcome for the step.
    Complete,
    /// Resolve the step as failed.
    Fail(EngineError),
    /// Send the same task to the same node again.
    Redispatch,
    /// Drop the callback.
    Ignore,
}

/// What a policy sees for one callback.
pub struct PolicyContext<'a> {
    pub run: &'a RunState,
    pub step_index: usize,
    pub node_step: &'a NodeStep,
    /// Consecutive timeouts of this node task, including the current one.
    pub consecutive_timeouts: u32,
    /// Timeout threshold resolved for this step.
    pub timeout_threshold: u32,
}

pub trait StepPolicy: Send + Sync {
    fn on_reply(&self, ctx: &PolicyContext<'_>, reply: &ReplyEnvelope) -> PolicyVerdict;
    fn on_timeout(&self, ctx: &PolicyContext<'_>) -> PolicyVerdict;
}

/// Any error reply fails the step; successful replies feed the carry-over data.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortOnError;

impl StepPolicy for AbortOnError {
    fn on_reply(&self, ctx: &PolicyContext<'_>, reply: &ReplyEnvelope) -> PolicyVerdict {
        let node_id = ctx.node_step.node_id.as_str();
        if !reply.is_success() {
            ctx.run.log(
                Some(ctx.step_index),
                Some(node_id),
                format!("node {} failed task {}: {}", node_id, ctx.node_step.id, reply.message),
            );
            return PolicyVerdict::Fail(EngineError::Remote {
                node_id: node_id.to_string(),
                message: reply.message.clone(),
            });
        }
        if ctx.node_step.requires_result && reply.return_data.is_empty() {
            return PolicyVerdict::Fail(EngineError::Remote {
                node_id: node_id.to_string(),
                message: format!("task {} returned no result", ctx.node_step.id),
            });
        }

        if !reply.return_data.is_empty() {
            ctx.run.operation().merge_return_data(&reply.return_data);
            if let Err(err) = ctx.run.save_operation() {
                return PolicyVerdict::Fail(err.into());
            }
        }
        debug!(
            operation_id = %ctx.run.operation_id(),
            step_index = ctx.step_index,
            node_id = %node_id,
            correlation_id = %ctx.node_step.id,
            result_keys = reply.return_data.len(),
            "Node task succeeded"
        );
        PolicyVerdict::Complete
    }

    fn on_timeout(&self, ctx: &PolicyContext<'_>) -> PolicyVerdict {
        AbortOnTimeoutCount::default().on_timeout(ctx)
    }
}

/// Fails the step once a node task has timed out `threshold` times in a row;
/// below the threshold the task is sent again.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortOnTimeoutCount {
    /// Overrides the step's resolved threshold when set.
    pub threshold: Option<u32>,
}

impl AbortOnTimeoutCount {
    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            threshold: Some(threshold),
        }
    }
}

impl StepPolicy for AbortOnTimeoutCount {
    fn on_reply(&self, ctx: &PolicyContext<'_>, reply: &ReplyEnvelope) -> PolicyVerdict {
        AbortOnError.on_reply(ctx, reply)
    }

    fn on_timeout(&self, ctx: &PolicyContext<'_>) -> PolicyVerdict {
        let threshold = self.threshold.unwrap_or(ctx.timeout_threshold).max(1);
        let node_id = ctx.node_step.node_id.as_str();
        if ctx.consecutive_timeouts < threshold {
            warn!(
                operation_id = %ctx.run.operation_id(),
                step_index = ctx.step_index,
                node_id = %node_id,
                correlation_id = %ctx.node_step.id,
                timeouts = ctx.consecutive_timeouts,
                threshold,
                "Node task timed out, sending again"
            );
            return PolicyVerdict::Redispatch;
        }

        ctx.run.log(
            Some(ctx.step_index),
            Some(node_id),
            format!(
                "node {} timed out on task {} ({} of {} allowed)",
                node_id, ctx.node_step.id, ctx.consecutive_timeouts, threshold
            ),
        );
        if let Err(err) = ctx.run.save_operation() {
            warn!(error = %err, "Failed to persist timeout log entry");
        }
        PolicyVerdict::Fail(EngineError::Timeout {
            node_id: node_id.to_string(),
            correlation_id: ctx.node_step.id.clone(),
            attempts: ctx.consecutive_timeouts,
        })
    }
}

/// A node's answer forwarded by [`ResultCapture`]. `reply` is `None` on timeout.
#[derive(Debug, Clone)]
pub struct CapturedResult {
    pub node_id: String,
    pub node_step_id: String,
    pub reply: Option<ReplyEnvelope>,
}

/// Forwards every node answer into a channel and never aborts the step. Layers
/// request/response semantics over the engine for read-only queries.
#[derive(Debug, Clone)]
pub struct ResultCapture {
    tx: mpsc::UnboundedSender<CapturedResult>,
}

impl ResultCapture {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CapturedResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, ctx: &PolicyContext<'_>, reply: Option<ReplyEnvelope>) {
        let captured = CapturedResult {
            node_id: ctx.node_step.node_id.clone(),
            node_step_id: ctx.node_step.id.clone(),
            reply,
        };
        if self.tx.send(captured).is_err() {
            debug!(
                node_step_id = %ctx.node_step.id,
                "Result receiver dropped, discarding captured result"
            );
        }
    }
}

impl StepPolicy for ResultCapture {
    fn on_reply(&self, ctx: &PolicyContext<'_>, reply: &ReplyEnvelope) -> PolicyVerdict {
        self.forward(ctx, Some(reply.clone()));
        PolicyVerdict::Complete
    }

    fn on_timeout(&self, ctx: &PolicyContext<'_>) -> PolicyVerdict {
        self.forward(ctx, None);
        PolicyVerdict::Complete
    }
}
