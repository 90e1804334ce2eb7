//! Operation, Step and NodeStep types.
//!
//! An Operation is created `Processing` by whoever breaks a request down into steps,
//! then mutated in place by the step executor only. Steps carry hook *names*
//! (generator, reply policy, timeout policy) rather than closures, so a persisted
//! operation can be resumed without rebuilding any code from its request.

use crate::engine::barrier::BarrierMode;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

/// Carry-over data: reply results keyed by stringified task index.
pub type ReturnData = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Processing,
    Successful,
    Error,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Processing => "processing",
            OperationStatus::Successful => "successful",
            OperationStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Processing)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work for a node agent. The payload is opaque to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Task {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// A task addressed to one node. `id` is the correlation key and is unique within
/// its step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeStep {
    pub id: String,
    pub node_id: String,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub requires_result: bool,
}

impl NodeStep {
    pub fn new(id: impl Into<String>, node_id: impl Into<String>, task: Task) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            tasks: vec![task],
            requires_result: false,
        }
    }

    pub fn requiring_result(mut self) -> Self {
        self.requires_result = true;
        self
    }

    /// The task the engine sends. Only the first task is ever dispatched.
    pub fn primary_task(&self) -> Option<&Task> {
        self.tasks.first()
    }
}

/// One ordered stage of an operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub node_steps: Vec<NodeStep>,
    /// Registered generator producing extra node steps from carry-over data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default)]
    pub ignore_generator_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Registered policy handling replies; abort-on-error when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_policy: Option<String>,
    /// Registered policy handling timeouts; abort-on-timeout-count when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barrier_mode: Option<BarrierMode>,
}

impl Step {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_steps: Vec::new(),
            generator: None,
            ignore_generator_error: false,
            delay_ms: None,
            reply_policy: None,
            timeout_policy: None,
            node_timeout_secs: None,
            timeout_threshold: None,
            barrier_mode: None,
        }
    }

    pub fn with_node_step(mut self, node_step: NodeStep) -> Self {
        self.node_steps.push(node_step);
        self
    }

    pub fn with_generator(mut self, name: impl Into<String>) -> Self {
        self.generator = Some(name.into());
        self
    }

    pub fn ignoring_generator_errors(mut self) -> Self {
        self.ignore_generator_error = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn with_reply_policy(mut self, name: impl Into<String>) -> Self {
        self.reply_policy = Some(name.into());
        self
    }

    pub fn with_timeout_policy(mut self, name: impl Into<String>) -> Self {
        self.timeout_policy = Some(name.into());
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn with_timeout_threshold(mut self, threshold: u32) -> Self {
        self.timeout_threshold = Some(threshold);
        self
    }

    pub fn with_barrier_mode(mut self, mode: BarrierMode) -> Self {
        self.barrier_mode = Some(mode);
        self
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Append generated node steps, skipping ids the step already holds.
    /// Returns how many were appended.
    pub fn extend_node_steps(&mut self, generated: Vec<NodeStep>) -> usize {
        let mut known: HashSet<String> = self.node_steps.iter().map(|ns| ns.id.clone()).collect();
        let mut appended = 0usize;
        for node_step in generated {
            if known.insert(node_step.id.clone()) {
                self.node_steps.push(node_step);
                appended += 1;
            }
        }
        appended
    }
}

/// Human-readable progress entry persisted with the operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationLog {
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
}

/// A persisted multi-step workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub id: String,
    pub cluster_id: String,
    /// Type tag; recovery picks its handlers from this.
    pub op_type: String,
    pub status: OperationStatus,
    pub current_step: usize,
    pub steps: BTreeMap<usize, Step>,
    #[serde(default)]
    pub step_return_data: ReturnData,
    /// Request parameters captured for recovery.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub logs: Vec<OperationLog>,
    #[serde(default)]
    pub owner_host: String,
    #[serde(default)]
    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(
        id: impl Into<String>,
        cluster_id: impl Into<String>,
        op_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            cluster_id: cluster_id.into(),
            op_type: op_type.into(),
            status: OperationStatus::Processing,
            current_step: 0,
            steps: BTreeMap::new(),
            step_return_data: ReturnData::new(),
            params: BTreeMap::new(),
            logs: Vec::new(),
            owner_host: String::new(),
            operator: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a step at the next index.
    pub fn with_step(mut self, step: Step) -> Self {
        self.push_step(step);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = operator.into();
        self
    }

    pub fn with_owner_host(mut self, host: impl Into<String>) -> Self {
        self.owner_host = host.into();
        self
    }

    /// Steps only ever grow; new steps land after the last index.
    pub fn push_step(&mut self, step: Step) -> usize {
        let index = self.steps.keys().next_back().map(|last| last + 1).unwrap_or(0);
        self.steps.insert(index, step);
        index
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(&index)
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(&index)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Move the cursor forward. The current step never decreases.
    pub fn advance_to(&mut self, index: usize) -> Result<(), EngineError> {
        if index < self.current_step {
            return Err(EngineError::InvalidOperation(format!(
                "operation {} cannot move from step {} back to step {}",
                self.id, self.current_step, index
            )));
        }
        if !self.steps.contains_key(&index) {
            return Err(EngineError::InvalidOperation(format!(
                "operation {} has no step at index {}",
                self.id, index
            )));
        }
        self.current_step = index;
        self.touch();
        Ok(())
    }

    /// Merge a reply's results into the carry-over data. Keys not present in
    /// `data` are left untouched.
    pub fn merge_return_data(&mut self, data: &ReturnData) {
        for (key, value) in data {
            self.step_return_data.insert(key.clone(), value.clone());
        }
        self.touch();
    }

    pub fn log(&mut self, step_index: Option<usize>, node_id: Option<&str>, message: impl Into<String>) {
        self.logs.push(OperationLog {
            at: Utc::now(),
            step_index,
            node_id: node_id.map(str::to_string),
            message: message.into(),
        });
        self.touch();
    }

    pub fn set_status(&mut self, status: OperationStatus) {
        self.status = status;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Check the structural invariants the executor relies on.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.trim().is_empty() {
            return Err(EngineError::InvalidOperation(
                "operation id cannot be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(EngineError::InvalidOperation(format!(
                "operation {} has no steps",
                self.id
            )));
        }
        for (expected, index) in self.steps.keys().enumerate() {
            if expected != *index {
                return Err(EngineError::InvalidOperation(format!(
                    "operation {} step indices are not contiguous at {}",
                    self.id, index
                )));
            }
        }
        if self.status == OperationStatus::Processing && !self.steps.contains_key(&self.current_step) {
            return Err(EngineError::InvalidOperation(format!(
                "operation {} current step {} does not name a step",
                self.id, self.current_step
            )));
        }
        for (index, step) in &self.steps {
            let mut seen = HashSet::new();
            for node_step in &step.node_steps {
                if !seen.insert(node_step.id.as_str()) {
                    return Err(EngineError::InvalidOperation(format!(
                        "step {} ({}) has duplicate node step id {}",
                        index, step.name, node_step.id
                    )));
                }
            }
        }
        Ok(())
    }
}
