//! Plan Builder data model: logical tasks (one per static-structure task
//! node) lowered and fused into a physical, layered DAG.

use crate::ids::CapabilityId;
use crate::static_structure::{ArgumentRef, LoopType, NodeId};
use crate::tool::ToolId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One task node from the static structure, unchanged except for its
/// `dependsOn` set (derived from `DataFlow` edges only; `Order` edges do not
/// constrain physical parallelism, per spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalTask {
    pub id: NodeId,
    pub tool: ToolId,
    pub static_arguments: HashMap<String, ArgumentRef>,
    /// For each `static_arguments` entry that is a `PriorResult`, the id of
    /// the logical task whose output resolves it (the `DataFlow` edge's
    /// source) -- resolved once here so the executor never has to re-walk
    /// the static structure's edges at runtime.
    pub argument_sources: HashMap<String, NodeId>,
    pub binding: Option<String>,
    pub depends_on: Vec<NodeId>,
    pub loop_id: Option<String>,
    pub loop_type: Option<LoopType>,
}

/// A physical task: one or more fused logical tasks that execute as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalTask {
    pub id: String,
    /// Logical task ids contracted into this physical task, in execution order.
    pub logical_tasks: Vec<NodeId>,
    pub depends_on: Vec<String>,
    pub layer_index: u32,
    pub requires_approval: bool,
}

/// The physical DAG produced by [`super::build_physical_dag`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalDag {
    pub logical_tasks: HashMap<NodeId, LogicalTask>,
    pub physical_tasks: Vec<PhysicalTask>,
    pub layer_count: u32,
    pub requires_approval: bool,
}

impl PhysicalDag {
    #[must_use]
    pub fn layer(&self, index: u32) -> Vec<&PhysicalTask> {
        self.physical_tasks
            .iter()
            .filter(|t| t.layer_index == index)
            .collect()
    }
}

/// Inputs to the validation predicate beyond what the tool registry knows.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// The request explicitly asked for human-in-the-loop approval.
    pub approval_mode_hil: bool,
    /// Capability ids a `capability_id` static argument is allowed to
    /// reference without forcing approval.
    pub known_capability_ids: Vec<CapabilityId>,
}
