//! Controlled Executor (C9): runs a physical DAG layer-by-layer with bounded
//! concurrency, checkpointing, approval gates, and resumption.
//!
//! Concurrency within a layer follows the teacher's `llm::batch::BatchExecutor`
//! idiom: a `tokio::sync::Semaphore` bounds parallelism and `futures::
//! future::join_all` drives every task in the layer to completion before the
//! layer boundary (the checkpoint) is crossed.

use super::invoker::ToolInvoker;
use super::store::{WorkflowStore, DEFAULT_WORKFLOW_TTL_SECS};
use super::types::{
    ActiveWorkflow, Command, Event, ExecutionResult, SerializedState, TaskOutcome, WorkflowStatus,
    DEFAULT_MAX_CONCURRENCY, DEFAULT_TASK_TIMEOUT_MS,
};
use crate::error::{Error, Result};
use crate::plan::{LogicalTask, PhysicalDag, PhysicalTask};
use crate::static_structure::{ArgumentRef, NodeId};
use crate::tool::ToolRegistry;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};

/// External collaborator that turns a replan request into a new candidate
/// DAG (spec.md §4.7's "external Suggester"). Out of scope to implement for
/// real: a test double or a remote planning service can both satisfy this.
#[async_trait]
pub trait Suggester: Send + Sync {
    async fn suggest_replan(
        &self,
        current: &PhysicalDag,
        completed_task_ids: &[NodeId],
        new_requirement: &str,
        context: Option<serde_json::Value>,
    ) -> Result<PhysicalDag>;
}

#[derive(Clone)]
pub struct ControlledExecutor {
    tools: Arc<ToolRegistry>,
    invoker: Arc<dyn ToolInvoker>,
    store: WorkflowStore,
    suggester: Option<Arc<dyn Suggester>>,
    max_concurrency: usize,
    task_timeout: Duration,
    workflow_ttl_secs: i64,
}

struct LayerRun {
    task_results: HashMap<NodeId, serde_json::Value>,
    successful_tasks: Vec<NodeId>,
    failed_tasks: Vec<NodeId>,
    physical_status: HashMap<String, TaskOutcome>,
}

impl ControlledExecutor {
    #[must_use]
    pub fn new(tools: Arc<ToolRegistry>, invoker: Arc<dyn ToolInvoker>, store: WorkflowStore) -> Self {
        Self {
            tools,
            invoker,
            store,
            suggester: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            task_timeout: Duration::from_millis(DEFAULT_TASK_TIMEOUT_MS),
            workflow_ttl_secs: DEFAULT_WORKFLOW_TTL_SECS,
        }
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_suggester(mut self, suggester: Arc<dyn Suggester>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    /// The underlying workflow store, for callers that need to inspect
    /// [`ActiveWorkflow`] state after driving an event stream to completion.
    #[must_use]
    pub fn workflow_store(&self) -> &WorkflowStore {
        &self.store
    }

    /// Run `dag` to completion (or to the first approval gate), blocking the
    /// caller until then. Does not stream events.
    pub async fn execute(
        &self,
        workflow_id: &str,
        dag: &PhysicalDag,
        args: &serde_json::Value,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        self.persist_new_workflow(workflow_id, dag)?;
        let run = self
            .run_from_layer(workflow_id, dag, args, 0, LayerRun::empty(), None, None)
            .await?;
        self.finish(workflow_id, dag, run, started)
    }

    /// Start (or continue) a streaming run, returning immediately with a
    /// receiver of [`Event`]s. The run continues in the background.
    pub fn execute_stream(
        &self,
        workflow_id: String,
        dag: PhysicalDag,
        args: serde_json::Value,
    ) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(64);
        let executor = self.clone();
        tokio::spawn(async move {
            if executor.persist_new_workflow(&workflow_id, &dag).is_err() {
                return;
            }
            let _ = executor
                .run_from_layer(&workflow_id, &dag, &args, 0, LayerRun::empty(), None, Some(tx))
                .await;
        });
        rx
    }

    /// Resume a paused or approved workflow from its latest checkpoint,
    /// streaming events for the remaining layers.
    pub async fn resume_from_checkpoint(&self, workflow_id: &str) -> Result<mpsc::Receiver<Event>> {
        let workflow = self
            .store
            .get_active_workflow(workflow_id)?
            .ok_or_else(|| Error::not_found(format!("no active workflow `{workflow_id}`")))?;
        if workflow.status != WorkflowStatus::Running {
            return Err(Error::state_violation(workflow.status.as_str(), "resume"));
        }

        let checkpoint_state = match self.store.latest_checkpoint(workflow_id)? {
            Some(cp) => cp.serialized_state,
            None => SerializedState::default(),
        };
        let run = LayerRun {
            task_results: checkpoint_state.task_results,
            successful_tasks: checkpoint_state.successful_tasks,
            failed_tasks: checkpoint_state.failed_tasks,
            physical_status: HashMap::new(),
        };

        let (tx, rx) = mpsc::channel(64);
        let executor = self.clone();
        let dag = workflow.dag.clone();
        let workflow_id = workflow_id.to_string();
        let start_layer = workflow.current_layer;
        let approved_layer = workflow.approval_granted_for_layer;
        tokio::spawn(async move {
            let _ = executor
                .run_from_layer(&workflow_id, &dag, &serde_json::json!({}), start_layer, run, approved_layer, Some(tx))
                .await;
        });
        Ok(rx)
    }

    /// Apply a control command to a workflow, enforcing the state machine
    /// (spec.md §4.7).
    pub async fn enqueue_command(&self, workflow_id: &str, cmd: Command) -> Result<()> {
        let mut workflow = self
            .store
            .get_active_workflow(workflow_id)?
            .ok_or_else(|| Error::not_found(format!("no active workflow `{workflow_id}`")))?;

        match cmd {
            Command::Continue { .. } => {
                if workflow.status != WorkflowStatus::Paused {
                    return Err(Error::state_violation(workflow.status.as_str(), "continue"));
                }
                workflow.status = WorkflowStatus::Running;
            }
            Command::Abort { .. } => {
                if workflow.status.is_terminal() {
                    return Err(Error::state_violation(workflow.status.as_str(), "abort"));
                }
                workflow.status = WorkflowStatus::Aborted;
            }
            Command::ApprovalResponse { approved, .. } => {
                if workflow.status != WorkflowStatus::AwaitingApproval {
                    return Err(Error::state_violation(workflow.status.as_str(), "approval_response"));
                }
                if approved {
                    workflow.status = WorkflowStatus::Running;
                    workflow.approval_granted_for_layer = Some(workflow.current_layer);
                } else {
                    workflow.status = WorkflowStatus::Aborted;
                }
            }
            Command::ReplanDag { new_requirement, context } => {
                if !matches!(workflow.status, WorkflowStatus::Paused | WorkflowStatus::Running) {
                    return Err(Error::state_violation(workflow.status.as_str(), "replan_dag"));
                }
                let suggester = self
                    .suggester
                    .as_ref()
                    .ok_or_else(|| Error::invalid_argument("no suggester configured for replan_dag"))?;
                let completed: Vec<NodeId> = workflow
                    .layer_results
                    .successful_tasks
                    .iter()
                    .cloned()
                    .collect();
                let new_dag = suggester
                    .suggest_replan(&workflow.dag, &completed, &new_requirement, context)
                    .await?;
                validate_super_dag(&workflow.dag, &new_dag, &completed)?;
                workflow.dag = new_dag;
            }
        }
        workflow.last_activity_at = chrono::Utc::now().to_rfc3339();
        workflow.expires_at = (chrono::Utc::now() + chrono::Duration::seconds(self.workflow_ttl_secs)).to_rfc3339();
        self.store.upsert_active_workflow(&workflow)
    }

    fn persist_new_workflow(&self, workflow_id: &str, dag: &PhysicalDag) -> Result<()> {
        if self.store.get_active_workflow(workflow_id)?.is_some() {
            return Ok(());
        }
        let now = chrono::Utc::now();
        self.store.upsert_active_workflow(&ActiveWorkflow {
            workflow_id: workflow_id.to_string(),
            status: WorkflowStatus::Running,
            current_layer: 0,
            total_layers: dag.layer_count,
            dag: dag.clone(),
            layer_results: SerializedState::default(),
            created_at: now.to_rfc3339(),
            last_activity_at: now.to_rfc3339(),
            expires_at: (now + chrono::Duration::seconds(self.workflow_ttl_secs)).to_rfc3339(),
            latest_checkpoint_layer: None,
            approval_granted_for_layer: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_from_layer(
        &self,
        workflow_id: &str,
        dag: &PhysicalDag,
        args: &serde_json::Value,
        start_layer: u32,
        mut run: LayerRun,
        mut approved_layer: Option<u32>,
        events: Option<mpsc::Sender<Event>>,
    ) -> Result<ExecutionResult> {
        if start_layer == 0 {
            send(&events, Event::WorkflowStart { workflow_id: workflow_id.to_string() }).await;
        }

        for layer in start_layer..dag.layer_count {
            let tasks = dag.layer(layer);
            let gated: Vec<&PhysicalTask> = tasks.iter().copied().filter(|t| t.requires_approval).collect();
            if !gated.is_empty() && approved_layer != Some(layer) {
                self.store.save_checkpoint(workflow_id, layer.saturating_sub(1), &run.to_state())?;
                let checkpoint_id = format!("{workflow_id}:{layer}");
                let mut workflow = self
                    .store
                    .get_active_workflow(workflow_id)?
                    .ok_or_else(|| Error::executor_crash("workflow vanished mid-run"))?;
                workflow.status = WorkflowStatus::AwaitingApproval;
                workflow.current_layer = layer;
                workflow.layer_results = run.to_state();
                self.store.upsert_active_workflow(&workflow)?;
                send(&events, Event::DecisionRequired { checkpoint_id: checkpoint_id.clone(), layer }).await;
                return Ok(self.result_from_run(run, dag.layer_count, Duration::default(), WorkflowStatus::AwaitingApproval, Some(checkpoint_id)));
            }
            approved_layer = None;

            send(&events, Event::LayerStart { layer }).await;
            self.run_layer(dag, tasks, args, &mut run, &events).await;
            send(&events, Event::LayerComplete { layer }).await;

            self.store.save_checkpoint(workflow_id, layer, &run.to_state())?;
            send(&events, Event::Checkpoint { layer }).await;

            let mut workflow = self
                .store
                .get_active_workflow(workflow_id)?
                .ok_or_else(|| Error::executor_crash("workflow vanished mid-run"))?;
            if workflow.status == WorkflowStatus::Aborted {
                send(&events, Event::WorkflowComplete { status: "aborted".to_string() }).await;
                return Ok(self.result_from_run(run, dag.layer_count, Duration::default(), WorkflowStatus::Aborted, None));
            }
            workflow.current_layer = layer + 1;
            workflow.latest_checkpoint_layer = Some(layer);
            workflow.layer_results = run.to_state();
            workflow.last_activity_at = chrono::Utc::now().to_rfc3339();
            self.store.upsert_active_workflow(&workflow)?;
        }

        let mut workflow = self
            .store
            .get_active_workflow(workflow_id)?
            .ok_or_else(|| Error::executor_crash("workflow vanished mid-run"))?;
        workflow.status = WorkflowStatus::Completed;
        self.store.upsert_active_workflow(&workflow)?;
        send(&events, Event::WorkflowComplete { status: "completed".to_string() }).await;
        Ok(self.result_from_run(run, dag.layer_count, Duration::default(), WorkflowStatus::Completed, None))
    }

    async fn run_layer(
        &self,
        dag: &PhysicalDag,
        tasks: Vec<&PhysicalTask>,
        args: &serde_json::Value,
        run: &mut LayerRun,
        events: &Option<mpsc::Sender<Event>>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let snapshot = &run.task_results;

        let futures = tasks.iter().map(|task| {
            let semaphore = Arc::clone(&semaphore);
            let blocked = !task.depends_on.is_empty()
                && task
                    .depends_on
                    .iter()
                    .all(|d| matches!(run.physical_status.get(d), Some(TaskOutcome::Error { .. })));
            async move {
                if blocked {
                    return (task.id.clone(), None);
                }
                let _permit = semaphore.acquire().await.expect("semaphore closed unexpectedly");
                let outcomes = self.execute_physical_task(task, dag, snapshot, args, events).await;
                (task.id.clone(), Some(outcomes))
            }
        });

        let results = join_all(futures).await;
        for (physical_id, outcomes) in results {
            match outcomes {
                None => {
                    run.physical_status.insert(
                        physical_id.clone(),
                        TaskOutcome::Error {
                            kind: "Internal".to_string(),
                            message: "upstream dependency failed".to_string(),
                        },
                    );
                    if let Some(task) = dag.physical_tasks.iter().find(|t| t.id == physical_id) {
                        run.failed_tasks.extend(task.logical_tasks.iter().cloned());
                    }
                }
                Some(outcomes) => {
                    let mut overall = TaskOutcome::Success { result: serde_json::Value::Null };
                    for (logical_id, outcome) in outcomes {
                        match &outcome {
                            TaskOutcome::Success { result } => {
                                run.task_results.insert(logical_id.clone(), result.clone());
                                run.successful_tasks.push(logical_id);
                            }
                            TaskOutcome::FailedSafe { .. } => {
                                run.failed_tasks.push(logical_id);
                                overall = outcome.clone();
                            }
                            TaskOutcome::Error { .. } => {
                                run.failed_tasks.push(logical_id);
                                overall = outcome.clone();
                            }
                        }
                    }
                    run.physical_status.insert(physical_id, overall);
                }
            }
        }
    }

    async fn execute_physical_task(
        &self,
        task: &PhysicalTask,
        dag: &PhysicalDag,
        global_results: &HashMap<NodeId, serde_json::Value>,
        args: &serde_json::Value,
        events: &Option<mpsc::Sender<Event>>,
    ) -> Vec<(NodeId, TaskOutcome)> {
        let mut local_results: HashMap<NodeId, serde_json::Value> = HashMap::new();
        let mut outcomes = Vec::new();

        for logical_id in &task.logical_tasks {
            let Some(logical) = dag.logical_tasks.get(logical_id) else {
                outcomes.push((
                    logical_id.clone(),
                    TaskOutcome::Error {
                        kind: "Internal".to_string(),
                        message: format!("no logical task `{logical_id}` in dag"),
                    },
                ));
                break;
            };
            send(events, Event::TaskStart { task_id: logical_id.clone() }).await;

            let pure = self.tools.get(&logical.tool).map_or(false, |t| t.pure);
            let outcome = match resolve_arguments(logical, global_results, &local_results, args) {
                Err(e) => TaskOutcome::from_error(&e, pure),
                Ok(resolved) => {
                    if !self.tools.contains(&logical.tool) {
                        TaskOutcome::from_error(&Error::tool_unavailable(logical.tool.to_string()), pure)
                    } else {
                        match tokio::time::timeout(self.task_timeout, self.invoker.call_tool(&logical.tool, resolved)).await {
                            Err(_) => TaskOutcome::from_error(&Error::timeout(self.task_timeout.as_millis() as u64), pure),
                            Ok(Err(e)) => TaskOutcome::from_error(&e, pure),
                            Ok(Ok(value)) => {
                                local_results.insert(logical_id.clone(), value.clone());
                                TaskOutcome::Success { result: value }
                            }
                        }
                    }
                }
            };

            match &outcome {
                TaskOutcome::Success { result } => {
                    send(events, Event::TaskComplete { task_id: logical_id.clone(), result: result.clone() }).await;
                    outcomes.push((logical_id.clone(), outcome));
                }
                TaskOutcome::FailedSafe { kind, message } => {
                    send(
                        events,
                        Event::TaskFailedSafe { task_id: logical_id.clone(), kind: kind.clone(), message: message.clone() },
                    )
                    .await;
                    outcomes.push((logical_id.clone(), outcome));
                    break;
                }
                TaskOutcome::Error { kind, message } => {
                    send(
                        events,
                        Event::TaskError { task_id: logical_id.clone(), kind: kind.clone(), message: message.clone() },
                    )
                    .await;
                    outcomes.push((logical_id.clone(), outcome));
                    break;
                }
            }
        }

        outcomes
    }

    fn result_from_run(
        &self,
        run: LayerRun,
        parallelization_layers: u32,
        elapsed: Duration,
        status: WorkflowStatus,
        pending_checkpoint_id: Option<String>,
    ) -> ExecutionResult {
        let errors = run
            .failed_tasks
            .iter()
            .filter_map(|id| {
                run.physical_status
                    .values()
                    .find_map(|o| match o {
                        TaskOutcome::Error { message, .. } | TaskOutcome::FailedSafe { message, .. } => {
                            Some(format!("{id}: {message}"))
                        }
                        TaskOutcome::Success { .. } => None,
                    })
            })
            .collect();
        ExecutionResult {
            results: run.task_results,
            successful_tasks: run.successful_tasks,
            failed_tasks: run.failed_tasks,
            parallelization_layers,
            errors,
            execution_time_ms: elapsed.as_millis() as u64,
            status,
            pending_checkpoint_id,
        }
    }

    fn finish(&self, workflow_id: &str, dag: &PhysicalDag, run: ExecutionResult, started: Instant) -> Result<ExecutionResult> {
        let _ = workflow_id;
        let _ = dag;
        Ok(ExecutionResult {
            execution_time_ms: started.elapsed().as_millis() as u64,
            ..run
        })
    }
}

impl LayerRun {
    fn empty() -> Self {
        Self {
            task_results: HashMap::new(),
            successful_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            physical_status: HashMap::new(),
        }
    }

    fn to_state(&self) -> SerializedState {
        SerializedState {
            task_results: self.task_results.clone(),
            successful_tasks: self.successful_tasks.clone(),
            failed_tasks: self.failed_tasks.clone(),
        }
    }
}

async fn send(events: &Option<mpsc::Sender<Event>>, event: Event) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

fn resolve_arguments(
    logical: &LogicalTask,
    global: &HashMap<NodeId, serde_json::Value>,
    local: &HashMap<NodeId, serde_json::Value>,
    args: &serde_json::Value,
) -> Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    for (name, arg_ref) in &logical.static_arguments {
        let value = match arg_ref {
            ArgumentRef::Literal { value } => value.clone(),
            ArgumentRef::Parameter { name: param } => args
                .get(param)
                .cloned()
                .ok_or_else(|| Error::invalid_argument(format!("missing parameter `{param}`")))?,
            ArgumentRef::PriorResult { path, .. } => {
                let source = logical.argument_sources.get(name).ok_or_else(|| {
                    Error::invalid_argument(format!("argument `{name}` has no resolved source"))
                })?;
                let base = local
                    .get(source)
                    .or_else(|| global.get(source))
                    .ok_or_else(|| Error::invalid_argument(format!("upstream task `{source}` has no result")))?;
                navigate_path(base, path)?
            }
        };
        map.insert(name.clone(), value);
    }
    Ok(serde_json::Value::Object(map))
}

fn navigate_path(value: &serde_json::Value, path: &[String]) -> Result<serde_json::Value> {
    let mut cur = value;
    for segment in path {
        cur = cur
            .get(segment)
            .ok_or_else(|| Error::invalid_argument(format!("field `{segment}` not found in upstream result")))?;
    }
    Ok(cur.clone())
}

/// A replan is only accepted if every completed task id survives with the
/// same tool and the same `dependsOn` set (spec.md §4.7).
fn validate_super_dag(old: &PhysicalDag, new: &PhysicalDag, completed: &[NodeId]) -> Result<()> {
    for id in completed {
        let Some(old_task) = old.logical_tasks.get(id) else { continue };
        let Some(new_task) = new.logical_tasks.get(id) else {
            return Err(Error::invalid_argument(format!(
                "replanned dag drops completed task `{id}`"
            )));
        };
        if old_task.tool != new_task.tool {
            return Err(Error::invalid_argument(format!(
                "replanned dag changes the tool for completed task `{id}`"
            )));
        }
        let mut old_deps = old_task.depends_on.clone();
        let mut new_deps = new_task.depends_on.clone();
        old_deps.sort();
        new_deps.sort();
        if old_deps != new_deps {
            return Err(Error::invalid_argument(format!(
                "replanned dag changes dependsOn for completed task `{id}`"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::invoker::FakeInvoker;
    use crate::plan::{build_physical_dag, PlanOptions};
    use crate::static_structure;
    use crate::store::SqlitePool;
    use crate::tool::{Routing, Tool, ToolId};
    use crate::vector::Vector;

    fn registry_with(tools: &[(&str, bool, bool)]) -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        for (id, pure, elevated) in tools {
            registry.register(Tool {
                id: ToolId::parse(id).unwrap(),
                name: (*id).to_string(),
                description: String::new(),
                input_schema: serde_json::json!({}),
                output_schema: None,
                embedding: Vector::new(vec![1.0, 0.0]).unwrap(),
                success_stats: Default::default(),
                pure: *pure,
                routing: Routing::Local,
                elevated: *elevated,
            });
        }
        Arc::new(registry)
    }

    fn executor(tools: Arc<ToolRegistry>, invoker: FakeInvoker) -> ControlledExecutor {
        let store = WorkflowStore::new(SqlitePool::open_in_memory().unwrap());
        ControlledExecutor::new(tools, Arc::new(invoker), store)
    }

    #[tokio::test]
    async fn executes_single_task_to_completion() {
        let tools = registry_with(&[("fs:read_file", true, false)]);
        let structure = static_structure::build("await mcp.fs.read_file({path: 'a'});").unwrap();
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        let invoker = FakeInvoker::new().with_result(
            ToolId::parse("fs:read_file").unwrap(),
            serde_json::json!({"contents": "hi"}),
        );
        let exec = executor(tools, invoker);
        let result = exec.execute("wf1", &dag, &serde_json::json!({})).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.successful_tasks.len(), 1);
        assert!(result.failed_tasks.is_empty());
    }

    #[tokio::test]
    async fn pure_task_failure_is_failed_safe_not_error() {
        let tools = registry_with(&[("fs:read_file", true, false)]);
        let structure = static_structure::build("await mcp.fs.read_file({path: 'a'});").unwrap();
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        let invoker = FakeInvoker::new().with_error(ToolId::parse("fs:read_file").unwrap(), "disk full");
        let exec = executor(tools, invoker);
        let result = exec.execute("wf2", &dag, &serde_json::json!({})).await.unwrap();
        assert_eq!(result.failed_tasks.len(), 1);
        assert_eq!(result.successful_tasks.len(), 0);
    }

    #[tokio::test]
    async fn dependent_task_consumes_upstream_result() {
        let tools = registry_with(&[("fs:read_file", true, false), ("fs:write_file", false, false)]);
        let code = "const a = await mcp.fs.read_file({path: 'x'});\n\
                    const b = await mcp.fs.write_file({path: 'y', data: a.contents});";
        let structure = static_structure::build(code).unwrap();
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        let invoker = FakeInvoker::new()
            .with_result(ToolId::parse("fs:read_file").unwrap(), serde_json::json!({"contents": "payload"}))
            .with_result(ToolId::parse("fs:write_file").unwrap(), serde_json::json!({"ok": true}));
        let exec = executor(tools, invoker);
        let result = exec.execute("wf3", &dag, &serde_json::json!({})).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.successful_tasks.len(), 2);
    }

    #[tokio::test]
    async fn elevated_tool_pauses_for_approval() {
        let tools = registry_with(&[("fs:write_file", false, true)]);
        let structure = static_structure::build("await mcp.fs.write_file({path: 'a', data: 'x'});").unwrap();
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        let invoker = FakeInvoker::new().with_result(ToolId::parse("fs:write_file").unwrap(), serde_json::json!({}));
        let exec = executor(tools, invoker);
        let result = exec.execute("wf4", &dag, &serde_json::json!({})).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::AwaitingApproval);
        assert!(result.pending_checkpoint_id.is_some());
    }

    #[tokio::test]
    async fn approval_response_false_aborts_workflow() {
        let tools = registry_with(&[("fs:write_file", false, true)]);
        let structure = static_structure::build("await mcp.fs.write_file({path: 'a', data: 'x'});").unwrap();
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        let invoker = FakeInvoker::new().with_result(ToolId::parse("fs:write_file").unwrap(), serde_json::json!({}));
        let exec = executor(tools, invoker);
        exec.execute("wf5", &dag, &serde_json::json!({})).await.unwrap();
        exec.enqueue_command(
            "wf5",
            Command::ApprovalResponse { checkpoint_id: "wf5:0".to_string(), approved: false, feedback: None },
        )
        .await
        .unwrap();
        let err = exec
            .enqueue_command("wf5", Command::Continue { reason: None })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StateViolation);
    }

    #[tokio::test]
    async fn approval_response_true_resumes_and_completes() {
        let tools = registry_with(&[("fs:write_file", false, true)]);
        let structure = static_structure::build("await mcp.fs.write_file({path: 'a', data: 'x'});").unwrap();
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        let invoker = FakeInvoker::new().with_result(ToolId::parse("fs:write_file").unwrap(), serde_json::json!({}));
        let exec = executor(tools, invoker);
        let paused = exec.execute("wf6", &dag, &serde_json::json!({})).await.unwrap();
        assert_eq!(paused.status, WorkflowStatus::AwaitingApproval);

        exec.enqueue_command(
            "wf6",
            Command::ApprovalResponse { checkpoint_id: "wf6:0".to_string(), approved: true, feedback: None },
        )
        .await
        .unwrap();

        let mut rx = exec.resume_from_checkpoint("wf6").await.unwrap();
        let mut completed = false;
        while let Some(event) = rx.recv().await {
            if let Event::WorkflowComplete { status } = event {
                assert_eq!(status, "completed");
                completed = true;
            }
        }
        assert!(completed);
    }

    #[tokio::test]
    async fn abort_from_running_is_legal_continue_from_running_is_not() {
        let tools = registry_with(&[("fs:read_file", true, false)]);
        let structure = static_structure::build("await mcp.fs.read_file({path: 'a'});").unwrap();
        let dag = build_physical_dag(&structure, &tools, &PlanOptions::default()).unwrap();
        let invoker = FakeInvoker::new().with_result(ToolId::parse("fs:read_file").unwrap(), serde_json::json!({}));
        let exec = executor(tools, invoker);
        exec.execute("wf7", &dag, &serde_json::json!({})).await.unwrap();
        // Workflow is already `completed` by the time execute() returns, so
        // further commands are illegal.
        let err = exec
            .enqueue_command("wf7", Command::Continue { reason: None })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StateViolation);
    }
}
