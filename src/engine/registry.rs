//! Named step hooks.
//!
//! Steps persist generator and policy names; the registry turns those names back
//! into code at run time. The built-in policies are always registered.

use crate::engine::policy::{
    AbortOnError, AbortOnTimeoutCount, StepPolicy, ABORT_ON_ERROR, ABORT_ON_TIMEOUT_COUNT,
};
use crate::error::EngineError;
use crate::operation::{Cluster, NodeStep, Operation, ReturnData, Step};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Produces extra node steps for a step right before it runs.
pub trait StepGenerator: Send + Sync {
    fn generate(
        &self,
        carry_over: &ReturnData,
        cluster: &Cluster,
        operation: &Operation,
    ) -> Result<Vec<NodeStep>, EngineError>;
}

impl<F> StepGenerator for F
where
    F: Fn(&ReturnData, &Cluster, &Operation) -> Result<Vec<NodeStep>, EngineError> + Send + Sync,
{
    fn generate(
        &self,
        carry_over: &ReturnData,
        cluster: &Cluster,
        operation: &Operation,
    ) -> Result<Vec<NodeStep>, EngineError> {
        self(carry_over, cluster, operation)
    }
}

/// The reply and timeout policies resolved for one step.
#[derive(Clone)]
pub struct StepHandlers {
    pub reply: Arc<dyn StepPolicy>,
    pub timeout: Arc<dyn StepPolicy>,
}

pub struct StepRegistry {
    generators: RwLock<HashMap<String, Arc<dyn StepGenerator>>>,
    policies: RwLock<HashMap<String, Arc<dyn StepPolicy>>>,
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StepRegistry {
    pub fn new() -> Self {
        let registry = Self {
            generators: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
        };
        registry.register_policy(ABORT_ON_ERROR, AbortOnError);
        registry.register_policy(ABORT_ON_TIMEOUT_COUNT, AbortOnTimeoutCount::default());
        registry
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn register_generator<G>(&self, name: impl Into<String>, generator: G)
    where
        G: StepGenerator + 'static,
    {
        self.generators.write().insert(name.into(), Arc::new(generator));
    }

    pub fn register_policy<P>(&self, name: impl Into<String>, policy: P)
    where
        P: StepPolicy + 'static,
    {
        self.policies.write().insert(name.into(), Arc::new(policy));
    }

    pub fn unregister_policy(&self, name: &str) -> bool {
        self.policies.write().remove(name).is_some()
    }

    pub fn generator(&self, name: &str) -> Option<Arc<dyn StepGenerator>> {
        self.generators.read().get(name).cloned()
    }

    pub fn policy(&self, name: &str) -> Option<Arc<dyn StepPolicy>> {
        self.policies.read().get(name).cloned()
    }

    /// Resolve the policies a step names, falling back to the built-ins.
    pub fn handlers_for(&self, step: &Step) -> Result<StepHandlers, EngineError> {
        let reply_name = step.reply_policy.as_deref().unwrap_or(ABORT_ON_ERROR);
        let timeout_name = step.timeout_policy.as_deref().unwrap_or(ABORT_ON_TIMEOUT_COUNT);
        Ok(StepHandlers {
            reply: self.require_policy(reply_name, step)?,
            timeout: self.require_policy(timeout_name, step)?,
        })
    }

    fn require_policy(&self, name: &str, step: &Step) -> Result<Arc<dyn StepPolicy>, EngineError> {
        self.policy(name).ok_or_else(|| {
            EngineError::ConfigError(format!(
                "step '{}' names unknown policy '{}'",
                step.name, name
            ))
        })
    }
}
