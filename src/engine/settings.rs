//! Resolved engine settings.

use crate::engine::barrier::BarrierMode;
use crate::operation::Step;
use crate::store::RuntimeSettings;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Identity of this control-plane host, used as the bus sender id.
    pub host_id: String,
    pub bus_subject: String,
    pub resource_server_url: String,
    pub node_timeout: Duration,
    pub timeout_threshold: u32,
    pub persist_each_step: bool,
    pub barrier_mode: BarrierMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            host_id: "clusterflow".to_string(),
            bus_subject: "clusterflow.task".to_string(),
            resource_server_url: "http://127.0.0.1:8081".to_string(),
            node_timeout: Duration::from_secs(60),
            timeout_threshold: 1,
            persist_each_step: true,
            barrier_mode: BarrierMode::WaitForAll,
        }
    }
}

impl EngineSettings {
    /// Apply the overrides kept in the state store.
    pub fn with_runtime_overrides(mut self, runtime: &RuntimeSettings) -> Self {
        if let Some(url) = runtime.resource_server_url.as_ref().filter(|u| !u.is_empty()) {
            self.resource_server_url = url.clone();
        }
        if let Some(secs) = runtime.node_timeout_secs.filter(|s| *s > 0) {
            self.node_timeout = Duration::from_secs(secs);
        }
        self
    }

    pub fn node_timeout_for(&self, step: &Step) -> Duration {
        step.node_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.node_timeout)
    }

    pub fn timeout_threshold_for(&self, step: &Step) -> u32 {
        step.timeout_threshold.unwrap_or(self.timeout_threshold).max(1)
    }

    pub fn barrier_mode_for(&self, step: &Step) -> BarrierMode {
        step.barrier_mode.unwrap_or(self.barrier_mode)
    }
}
