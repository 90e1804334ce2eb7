//! Workflow engine: executes multi-step operations across cluster nodes.
//!
//! [`Engine`] is the entry point. It wires the dispatcher, the step executor, the
//! single-task runner and the recovery coordinator around one shared
//! [`ExecutionContext`].

pub mod barrier;
pub mod dispatcher;
pub mod executor;
pub mod policy;
pub mod recovery;
pub mod registry;
pub mod run_state;
pub mod settings;
pub mod single_task;

pub use barrier::{BarrierMode, CompletionBarrier, StepResolution};
pub use dispatcher::{DispatchOutcome, NodeDispatcher, OutcomeSink};
pub use executor::{ActiveOperations, Completion, ExecutionContext, RunOutcome, StepExecutor};
pub use policy::{
    AbortOnError, AbortOnTimeoutCount, CapturedResult, PolicyContext, PolicyVerdict, ResultCapture,
    StepPolicy,
};
pub use recovery::{completion_for, RecoveryCoordinator};
pub use registry::{StepGenerator, StepHandlers, StepRegistry};
pub use settings::EngineSettings;
pub use single_task::SingleTaskRunner;

use crate::bus::MessageBus;
use crate::config::EngineConfig;
use crate::error::{EngineError, RecoveryError};
use crate::operation::{Cluster, NodeCollection, Operation, OperationKind, OperationStatus, ReturnData};
use crate::store::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

pub struct Engine {
    ctx: Arc<ExecutionContext>,
    executor: StepExecutor,
    single: SingleTaskRunner,
    recovery: RecoveryCoordinator,
}

impl Engine {
    pub fn new(ctx: ExecutionContext) -> Self {
        let ctx = Arc::new(ctx);
        Self {
            executor: StepExecutor::new(Arc::clone(&ctx)),
            single: SingleTaskRunner::new(Arc::clone(&ctx)),
            recovery: RecoveryCoordinator::new(),
            ctx,
        }
    }

    /// Build an engine from configuration, applying the runtime overrides kept in
    /// the store.
    pub fn from_config(
        config: &EngineConfig,
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn StateStore>,
        registry: Arc<StepRegistry>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let mut settings = config.to_settings();
        if let Some(runtime) = store.get_runtime_settings()? {
            settings = settings.with_runtime_overrides(&runtime);
        }
        Ok(Self::new(ExecutionContext::new(bus, store, registry, settings)))
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.ctx.settings
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.ctx.registry
    }

    pub fn is_running(&self, operation_id: &str) -> bool {
        self.ctx.active.is_active(operation_id)
    }

    /// Start an operation in the background. Returns once it is claimed; the
    /// handle resolves with the final state.
    pub fn start(
        &self,
        operation: Operation,
        cluster: Cluster,
        nodes: NodeCollection,
        completion: Completion,
    ) -> Result<JoinHandle<RunOutcome>, EngineError> {
        self.executor.start(operation, cluster, nodes, completion)
    }

    /// Start an operation with the completion callbacks of its kind.
    pub fn start_kind(
        &self,
        operation: Operation,
        cluster: Cluster,
        nodes: NodeCollection,
    ) -> Result<JoinHandle<RunOutcome>, EngineError> {
        let kind: OperationKind = operation.op_type.parse().map_err(EngineError::from)?;
        let completion = completion_for(kind, &operation)?;
        self.start(operation, cluster, nodes, completion)
    }

    /// Run an operation to completion on the current task.
    pub async fn run(
        &self,
        operation: Operation,
        cluster: Cluster,
        nodes: NodeCollection,
        completion: Completion,
    ) -> Result<RunOutcome, EngineError> {
        self.executor.run(operation, cluster, nodes, completion).await
    }

    pub async fn run_single_task(
        &self,
        operation: &mut Operation,
        cluster: &Cluster,
        nodes: &NodeCollection,
        timeout: Option<Duration>,
    ) -> Result<ReturnData, EngineError> {
        self.single.run(operation, cluster, nodes, timeout).await
    }

    pub fn recover(&self, operation: &mut Operation, cluster: &mut Cluster) -> Result<Completion, EngineError> {
        Ok(self.recovery.recover(operation, cluster)?)
    }

    /// Load a failed operation from the store and continue it from its failing step.
    pub fn resume(&self, operation_id: &str) -> Result<JoinHandle<RunOutcome>, EngineError> {
        if self.is_running(operation_id) {
            return Err(EngineError::AlreadyRunning(operation_id.to_string()));
        }
        let store = &self.ctx.store;
        let mut operation = store.require_operation(operation_id)?;
        if operation.status != OperationStatus::Error {
            return Err(RecoveryError::NotRecoverable {
                operation_id: operation.id.clone(),
                status: operation.status.to_string(),
            }
            .into());
        }
        let mut cluster = store.require_cluster(&operation.cluster_id)?;
        let nodes = store.list_nodes()?;

        let completion = self.recover(&mut operation, &mut cluster)?;
        store.save_operation(&operation)?;
        store.save_cluster(&cluster)?;
        info!(
            operation_id = %operation.id,
            step = operation.current_step,
            "Resuming operation"
        );
        self.start(operation, cluster, nodes, completion)
    }
}
