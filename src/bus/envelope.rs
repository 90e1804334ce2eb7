//! Wire envelopes exchanged with node agents.

use crate::operation::ReturnData;
use serde::{Deserialize, Serialize};

/// Task sent to a node agent for one node step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEnvelope {
    pub operation_id: String,
    pub task_type: String,
    pub cluster: String,
    pub resource_server_url: String,
    #[serde(default)]
    pub step_return_data: ReturnData,
    pub node_step_id: String,
    #[serde(default)]
    pub task_data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Successful,
    Error,
}

/// Reply from a node agent. `return_data` keys are stringified task indices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyEnvelope {
    pub node_id: String,
    pub operation_id: String,
    pub stat: ReplyStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub return_data: ReturnData,
}

impl ReplyEnvelope {
    pub fn success(node_id: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            operation_id: operation_id.into(),
            stat: ReplyStatus::Successful,
            message: String::new(),
            return_data: ReturnData::new(),
        }
    }

    pub fn error(
        node_id: impl Into<String>,
        operation_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            operation_id: operation_id.into(),
            stat: ReplyStatus::Error,
            message: message.into(),
            return_data: ReturnData::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.return_data.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.stat == ReplyStatus::Successful
    }
}
