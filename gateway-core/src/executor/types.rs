//! Controlled Executor data model: task outcomes, the event stream vocabulary,
//! workflow control commands, and the persisted checkpoint/active-workflow
//! rows.

use crate::error::{Error, ErrorKind};
use crate::static_structure::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_MAX_CONCURRENCY: usize = 5;
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 30_000;

/// The per-task result of running a physical task's underlying tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Produced a result; downstream tasks may consume it.
    Success { result: serde_json::Value },
    /// A `pure` task failed. Acceptable per-task, but the workflow cannot be
    /// saved as a capability if any task ends this way.
    FailedSafe { kind: String, message: String },
    /// Hard failure. Downstream tasks whose dependencies are all `error`
    /// propagate `error` without running.
    Error { kind: String, message: String },
}

impl TaskOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn from_error(err: &Error, pure: bool) -> Self {
        let kind = format!("{:?}", err.kind());
        if pure && err.kind() != ErrorKind::Timeout && err.kind() != ErrorKind::ExecutorCrash {
            Self::FailedSafe {
                kind,
                message: err.to_string(),
            }
        } else {
            Self::Error {
                kind,
                message: err.to_string(),
            }
        }
    }
}

/// Streamed during `execute_stream`/`resume_from_checkpoint`, in causal order
/// per workflow (spec.md §4.7, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    WorkflowStart { workflow_id: String },
    LayerStart { layer: u32 },
    TaskStart { task_id: String },
    TaskComplete { task_id: String, result: serde_json::Value },
    TaskError { task_id: String, kind: String, message: String },
    TaskFailedSafe { task_id: String, kind: String, message: String },
    Checkpoint { layer: u32 },
    DecisionRequired { checkpoint_id: String, layer: u32 },
    LayerComplete { layer: u32 },
    WorkflowComplete { status: String },
}

/// A control command enqueued against a running or paused workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Continue { reason: Option<String> },
    Abort { reason: Option<String> },
    ReplanDag {
        new_requirement: String,
        context: Option<serde_json::Value>,
    },
    ApprovalResponse {
        checkpoint_id: String,
        approved: bool,
        feedback: Option<String>,
    },
}

/// The workflow control state machine (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Paused,
    AwaitingApproval,
    Aborted,
    Completed,
}

impl WorkflowStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Aborted => "aborted",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, crate::error::Error> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "aborted" => Ok(Self::Aborted),
            "completed" => Ok(Self::Completed),
            other => Err(Error::invalid_argument(format!(
                "unknown workflow status `{other}`"
            ))),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted | Self::Completed)
    }
}

/// Returned by [`super::ControlledExecutor::execute`]: the synchronous,
/// non-streaming summary of a completed (or approval-paused) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub results: HashMap<NodeId, serde_json::Value>,
    pub successful_tasks: Vec<NodeId>,
    pub failed_tasks: Vec<NodeId>,
    pub parallelization_layers: u32,
    pub errors: Vec<String>,
    pub execution_time_ms: u64,
    pub status: WorkflowStatus,
    /// Set when `status == awaiting_approval`.
    pub pending_checkpoint_id: Option<String>,
}

/// One persisted `{layer, workflowId, serializedState}` checkpoint row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: String,
    pub layer: u32,
    pub serialized_state: SerializedState,
    pub created_at: String,
}

/// The in-memory state rebuilt from (or persisted into) a checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerializedState {
    pub task_results: HashMap<NodeId, serde_json::Value>,
    pub successful_tasks: Vec<NodeId>,
    pub failed_tasks: Vec<NodeId>,
}

/// The persisted `active_workflows` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveWorkflow {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub current_layer: u32,
    pub total_layers: u32,
    pub dag: crate::plan::PhysicalDag,
    pub layer_results: SerializedState,
    pub created_at: String,
    pub last_activity_at: String,
    pub expires_at: String,
    pub latest_checkpoint_layer: Option<u32>,
    /// Set by an `approval_response{approved: true}` command: the layer
    /// whose approval gate was cleared, so the next `resume_from_checkpoint`
    /// call does not immediately re-pause on the same layer.
    pub approval_granted_for_layer: Option<u32>,
}
