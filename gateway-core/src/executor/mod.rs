//! Controlled Executor (C9): executes a [`crate::plan::PhysicalDag`]
//! layer-by-layer with bounded concurrency, approval gates, checkpointing,
//! and resumable streaming.

mod engine;
mod invoker;
mod store;
mod types;

pub use engine::{ControlledExecutor, Suggester};
pub use invoker::{FakeInvoker, ToolInvoker};
pub use store::{WorkflowStore, DEFAULT_WORKFLOW_TTL_SECS};
pub use types::{
    ActiveWorkflow, Checkpoint, Command, Event, ExecutionResult, SerializedState, TaskOutcome,
    WorkflowStatus, DEFAULT_MAX_CONCURRENCY, DEFAULT_TASK_TIMEOUT_MS,
};
