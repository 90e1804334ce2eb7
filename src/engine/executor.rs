//! Step executor: drives an operation through its steps.
//!
//! Steps run strictly in order. Within a step every node task is dispatched at
//! once; the completion barrier decides when the step is over and the step's
//! policies decide what each callback means. After a step resolves, its
//! outstanding dispatch tasks are aborted and awaited so nothing from that step
//! can touch the run once the next one starts.

use crate::bus::{MessageBus, TaskEnvelope};
use crate::engine::barrier::{CompletionBarrier, StepResolution};
use crate::engine::dispatcher::{DispatchOutcome, NodeDispatcher, OutcomeSink};
use crate::engine::policy::{PolicyContext, PolicyVerdict};
use crate::engine::registry::{StepHandlers, StepRegistry};
use crate::engine::run_state::RunState;
use crate::engine::settings::EngineSettings;
use crate::error::{EngineError, StorageError};
use crate::operation::{Cluster, NodeCollection, NodeStep, Operation, OperationStatus, Step};
use crate::store::StateStore;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type DoneCallback = Box<dyn FnOnce(&mut Operation, &mut Cluster) + Send>;
pub type ErrorCallback = Box<dyn FnOnce(&mut Operation, &mut Cluster, &EngineError) + Send>;

/// Callbacks run once the operation reaches a terminal state, before the final
/// persist.
pub struct Completion {
    pub on_done: DoneCallback,
    pub on_error: ErrorCallback,
}

impl Completion {
    pub fn new<D, E>(on_done: D, on_error: E) -> Self
    where
        D: FnOnce(&mut Operation, &mut Cluster) + Send + 'static,
        E: FnOnce(&mut Operation, &mut Cluster, &EngineError) + Send + 'static,
    {
        Self {
            on_done: Box::new(on_done),
            on_error: Box::new(on_error),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_, _| {}, |_, _, _| {})
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// Ids of operations owned by a running executor in this process.
#[derive(Clone, Default)]
pub struct ActiveOperations {
    ids: Arc<Mutex<HashSet<String>>>,
}

/// Ownership of one operation id; released on drop.
pub struct ActiveClaim {
    ids: Arc<Mutex<HashSet<String>>>,
    operation_id: String,
}

impl ActiveOperations {
    pub fn claim(&self, operation_id: &str) -> Result<ActiveClaim, EngineError> {
        if !self.ids.lock().insert(operation_id.to_string()) {
            return Err(EngineError::AlreadyRunning(operation_id.to_string()));
        }
        Ok(ActiveClaim {
            ids: Arc::clone(&self.ids),
            operation_id: operation_id.to_string(),
        })
    }

    pub fn is_active(&self, operation_id: &str) -> bool {
        self.ids.lock().contains(operation_id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ActiveClaim {
    fn drop(&mut self) {
        self.ids.lock().remove(&self.operation_id);
    }
}

/// Everything an executor needs that outlives a single run.
pub struct ExecutionContext {
    pub dispatcher: NodeDispatcher,
    pub store: Arc<dyn StateStore>,
    pub registry: Arc<StepRegistry>,
    pub settings: EngineSettings,
    pub active: ActiveOperations,
}

impl ExecutionContext {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn StateStore>,
        registry: Arc<StepRegistry>,
        settings: EngineSettings,
    ) -> Self {
        let dispatcher = NodeDispatcher::new(bus, settings.bus_subject.clone(), settings.host_id.clone());
        Self {
            dispatcher,
            store,
            registry,
            settings,
            active: ActiveOperations::default(),
        }
    }
}

/// Final state of a run.
#[derive(Debug)]
pub struct RunOutcome {
    pub operation: Operation,
    pub cluster: Cluster,
    /// The error that failed the operation, if it failed.
    pub failure: Option<EngineError>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.operation.status == OperationStatus::Successful
    }
}

#[derive(Clone)]
pub struct StepExecutor {
    ctx: Arc<ExecutionContext>,
}

impl StepExecutor {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    /// Start the operation in the background from its current step.
    pub fn start(
        &self,
        operation: Operation,
        cluster: Cluster,
        nodes: NodeCollection,
        completion: Completion,
    ) -> Result<JoinHandle<RunOutcome>, EngineError> {
        operation.validate()?;
        let claim = self.ctx.active.claim(&operation.id)?;
        let executor = self.clone();
        Ok(tokio::spawn(async move {
            let _claim = claim;
            executor.drive(operation, cluster, nodes, completion).await
        }))
    }

    /// Run the operation to a terminal state from its current step.
    pub async fn run(
        &self,
        operation: Operation,
        cluster: Cluster,
        nodes: NodeCollection,
        completion: Completion,
    ) -> Result<RunOutcome, EngineError> {
        operation.validate()?;
        let _claim = self.ctx.active.claim(&operation.id)?;
        Ok(self.drive(operation, cluster, nodes, completion).await)
    }

    async fn drive(
        &self,
        mut operation: Operation,
        mut cluster: Cluster,
        nodes: NodeCollection,
        completion: Completion,
    ) -> RunOutcome {
        operation.owner_host = self.ctx.settings.host_id.clone();
        let start_index = operation.current_step;
        let step_count = operation.step_count();
        cluster.track_operation(&operation.id);
        let run = RunState::new(operation, cluster, nodes, Arc::clone(&self.ctx.store));

        info!(
            operation_id = %run.operation_id(),
            start_step = start_index,
            step_count,
            "Operation started"
        );
        if let Err(err) = self.persist_both(&run) {
            return self.fail(&run, start_index, err.into(), completion.on_error);
        }

        for index in start_index..step_count {
            let advanced = run.operation().advance_to(index);
            let result = match advanced {
                Ok(()) => self.run_step(&run, index).await,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                return self.fail(&run, index, err, completion.on_error);
            }
            if self.ctx.settings.persist_each_step {
                if let Err(err) = run.save_operation() {
                    error!(operation_id = %run.operation_id(), error = %err, "Failed to persist step progress");
                    return self.fail(&run, index, err.into(), completion.on_error);
                }
            }
        }

        self.succeed(&run, completion.on_done)
    }

    async fn run_step(&self, run: &Arc<RunState>, index: usize) -> Result<(), EngineError> {
        let step = run.operation().step(index).cloned().ok_or_else(|| {
            EngineError::InvalidOperation(format!("no step at index {}", index))
        })?;
        info!(
            operation_id = %run.operation_id(),
            step_index = index,
            step = %step.name,
            "Step started"
        );
        run.log(Some(index), None, format!("step {} ({}) started", index, step.name));

        if let Some(delay) = step.delay() {
            debug!(step_index = index, delay_ms = delay.as_millis() as u64, "Delaying step");
            tokio::time::sleep(delay).await;
        }

        let step = self.expand(run, index, step)?;
        if step.node_steps.is_empty() {
            info!(operation_id = %run.operation_id(), step_index = index, "Step has no node steps, skipping");
            run.log(Some(index), None, format!("step {} ({}) had no node tasks", index, step.name));
            return Ok(());
        }

        let handlers = self.ctx.registry.handlers_for(&step)?;
        let settings = &self.ctx.settings;
        let (barrier, wait) = CompletionBarrier::new(step.node_steps.len(), settings.barrier_mode_for(&step));
        let sink = StepSink::new(
            Arc::clone(run),
            index,
            &step,
            handlers,
            barrier,
            self.ctx.dispatcher.clone(),
            settings,
        );

        for node_step in &step.node_steps {
            if let Err(err) = sink.dispatch(node_step) {
                warn!(
                    operation_id = %run.operation_id(),
                    step_index = index,
                    node_id = %node_step.node_id,
                    error = %err,
                    "Node task could not be dispatched"
                );
                sink.barrier.record_failure(err);
                break;
            }
        }

        let resolution = wait.wait().await;
        sink.settle().await;

        match resolution {
            StepResolution::Succeeded => {
                info!(operation_id = %run.operation_id(), step_index = index, "Step completed");
                run.log(Some(index), None, format!("step {} ({}) completed", index, step.name));
                Ok(())
            }
            StepResolution::Failed(err) => Err(err),
        }
    }

    /// Run the step's generator, if any, and append its node steps.
    fn expand(&self, run: &RunState, index: usize, step: Step) -> Result<Step, EngineError> {
        let Some(name) = step.generator.clone() else {
            return Ok(step);
        };

        let generated = match self.ctx.registry.generator(&name) {
            Some(generator) => {
                let operation = run.operation();
                let cluster = run.cluster();
                generator.generate(&operation.step_return_data, &cluster, &operation)
            }
            None => Err(EngineError::Generator {
                step: step.name.clone(),
                message: format!("no generator registered as '{}'", name),
            }),
        };

        match generated {
            Ok(node_steps) => {
                let expanded = {
                    let mut operation = run.operation();
                    let target = operation.step_mut(index).ok_or_else(|| {
                        EngineError::InvalidOperation(format!("no step at index {}", index))
                    })?;
                    let appended = target.extend_node_steps(node_steps);
                    debug!(step_index = index, generator = %name, appended, "Generated node steps");
                    target.clone()
                };
                run.save_operation()?;
                Ok(expanded)
            }
            Err(err) if step.ignore_generator_error => {
                warn!(step_index = index, generator = %name, error = %err, "Ignoring generator failure");
                run.log(Some(index), None, format!("generator {} failed and was ignored: {}", name, err));
                Ok(step)
            }
            Err(err @ EngineError::Generator { .. }) => Err(err),
            Err(err) => Err(EngineError::Generator {
                step: step.name.clone(),
                message: err.to_string(),
            }),
        }
    }

    fn fail(&self, run: &RunState, index: usize, err: EngineError, on_error: ErrorCallback) -> RunOutcome {
        error!(
            operation_id = %run.operation_id(),
            step_index = index,
            error = %err,
            "Operation failed"
        );
        {
            let mut operation = run.operation();
            let mut cluster = run.cluster();
            operation.set_status(OperationStatus::Error);
            operation.log(Some(index), failed_node(&err), format!("step {} failed: {}", index, err));
            on_error(&mut operation, &mut cluster, &err);
        }
        if let Err(persist_err) = self.persist_both(run) {
            error!(operation_id = %run.operation_id(), error = %persist_err, "Failed to persist failed operation");
        }
        let (operation, cluster) = run.snapshot();
        RunOutcome {
            operation,
            cluster,
            failure: Some(err),
        }
    }

    fn succeed(&self, run: &RunState, on_done: DoneCallback) -> RunOutcome {
        {
            let mut operation = run.operation();
            let mut cluster = run.cluster();
            operation.set_status(OperationStatus::Successful);
            cluster.finish_operation(&operation.id);
            operation.log(None, None, "operation completed");
            on_done(&mut operation, &mut cluster);
        }
        if let Err(err) = self.persist_both(run) {
            error!(operation_id = %run.operation_id(), error = %err, "Failed to persist completed operation");
        }
        info!(operation_id = %run.operation_id(), "Operation completed");
        let (operation, cluster) = run.snapshot();
        RunOutcome {
            operation,
            cluster,
            failure: None,
        }
    }

    fn persist_both(&self, run: &RunState) -> Result<(), StorageError> {
        run.save_operation()?;
        run.save_cluster()
    }
}

fn failed_node(err: &EngineError) -> Option<&str> {
    match err {
        EngineError::Dispatch { node_id, .. }
        | EngineError::Remote { node_id, .. }
        | EngineError::Timeout { node_id, .. } => Some(node_id.as_str()),
        _ => None,
    }
}

/// Receives every dispatch outcome of one step and feeds the barrier.
struct StepSink {
    run: Arc<RunState>,
    step_index: usize,
    node_steps: HashMap<String, NodeStep>,
    envelopes: HashMap<String, TaskEnvelope>,
    handlers: StepHandlers,
    barrier: Arc<CompletionBarrier>,
    dispatcher: NodeDispatcher,
    node_timeout: Duration,
    timeout_threshold: u32,
    timeouts: Mutex<HashMap<String, u32>>,
    tasks: Mutex<DispatchTasks>,
}

/// Dispatch handles of one step. Once `closed`, nothing more is sent.
#[derive(Default)]
struct DispatchTasks {
    handles: Vec<JoinHandle<()>>,
    closed: bool,
}

impl StepSink {
    fn new(
        run: Arc<RunState>,
        step_index: usize,
        step: &Step,
        handlers: StepHandlers,
        barrier: Arc<CompletionBarrier>,
        dispatcher: NodeDispatcher,
        settings: &EngineSettings,
    ) -> Arc<Self> {
        let envelopes = {
            let operation = run.operation();
            step.node_steps
                .iter()
                .map(|node_step| {
                    let envelope = TaskEnvelope {
                        operation_id: operation.id.clone(),
                        task_type: operation.op_type.clone(),
                        cluster: operation.cluster_id.clone(),
                        resource_server_url: settings.resource_server_url.clone(),
                        step_return_data: operation.step_return_data.clone(),
                        node_step_id: node_step.id.clone(),
                        task_data: node_step
                            .primary_task()
                            .map(|task| task.data.clone())
                            .unwrap_or_default(),
                    };
                    (node_step.id.clone(), envelope)
                })
                .collect()
        };
        let node_steps = step
            .node_steps
            .iter()
            .map(|node_step| (node_step.id.clone(), node_step.clone()))
            .collect();
        Arc::new(Self {
            run,
            step_index,
            node_steps,
            envelopes,
            handlers,
            barrier,
            dispatcher,
            node_timeout: settings.node_timeout_for(step),
            timeout_threshold: settings.timeout_threshold_for(step),
            timeouts: Mutex::new(HashMap::new()),
            tasks: Mutex::new(DispatchTasks::default()),
        })
    }

    fn dispatch(self: &Arc<Self>, node_step: &NodeStep) -> Result<(), EngineError> {
        if node_step.primary_task().is_none() {
            return Err(EngineError::Dispatch {
                node_id: node_step.node_id.clone(),
                reason: format!("node step {} has no task", node_step.id),
            });
        }
        let envelope = self.envelopes.get(&node_step.id).ok_or_else(|| EngineError::Dispatch {
            node_id: node_step.node_id.clone(),
            reason: format!("no envelope prepared for node step {}", node_step.id),
        })?;
        let mut tasks = self.tasks.lock();
        if tasks.closed {
            debug!(
                step_index = self.step_index,
                correlation_id = %node_step.id,
                "Step already settled, not dispatching"
            );
            return Ok(());
        }
        let handle = self.dispatcher.dispatch(
            self.run.nodes(),
            &node_step.node_id,
            &node_step.id,
            envelope,
            self.node_timeout,
            Arc::clone(self) as Arc<dyn OutcomeSink>,
        )?;
        tasks.handles.push(handle);
        Ok(())
    }

    fn consecutive_timeouts(&self, outcome: &DispatchOutcome) -> u32 {
        let mut timeouts = self.timeouts.lock();
        let counter = timeouts.entry(outcome.correlation_id().to_string()).or_insert(0);
        if outcome.is_timeout() {
            *counter += 1;
        } else {
            *counter = 0;
        }
        *counter
    }

    /// Abort whatever is still in flight and wait for it to stop.
    async fn settle(&self) {
        let handles = {
            let mut tasks = self.tasks.lock();
            tasks.closed = true;
            std::mem::take(&mut tasks.handles)
        };
        for handle in &handles {
            handle.abort();
        }
        futures::future::join_all(handles).await;
    }
}

impl OutcomeSink for StepSink {
    fn deliver(self: Arc<Self>, outcome: DispatchOutcome) {
        if self.barrier.is_resolved() {
            debug!(
                step_index = self.step_index,
                correlation_id = %outcome.correlation_id(),
                "Outcome after step resolution ignored"
            );
            return;
        }
        let Some(node_step) = self.node_steps.get(outcome.correlation_id()) else {
            warn!(correlation_id = %outcome.correlation_id(), "Outcome for unknown node step");
            return;
        };

        let ctx = PolicyContext {
            run: &self.run,
            step_index: self.step_index,
            node_step,
            consecutive_timeouts: self.consecutive_timeouts(&outcome),
            timeout_threshold: self.timeout_threshold,
        };
        let verdict = match &outcome {
            DispatchOutcome::Reply { reply, .. } => self.handlers.reply.on_reply(&ctx, reply),
            DispatchOutcome::Timeout { .. } => self.handlers.timeout.on_timeout(&ctx),
        };

        match verdict {
            PolicyVerdict::Complete => {
                self.barrier.record_success();
            }
            PolicyVerdict::Fail(err) => {
                self.barrier.record_failure(err);
            }
            PolicyVerdict::Redispatch if self.barrier.is_resolved() => {
                debug!(
                    step_index = self.step_index,
                    correlation_id = %node_step.id,
                    "Step resolved while deciding, dropping redispatch"
                );
            }
            PolicyVerdict::Redispatch => {
                if let Err(err) = self.dispatch(node_step) {
                    self.barrier.record_failure(err);
                }
            }
            PolicyVerdict::Ignore => {}
        }
    }
}
