//! Static structure types: the typed graph the builder parses code into.

use crate::tool::ToolId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A unique id of a node within one [`StaticStructure`] (not globally unique;
/// scoped to the structure that produced it).
pub type NodeId = String;

/// How a task's argument resolves at execution time (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgumentRef {
    /// A literal value written directly in the code.
    Literal { value: serde_json::Value },
    /// Lookup by name against the caller-provided parameters.
    Parameter { name: String },
    /// A field path into a prior task's result, e.g. `cfg.path` selects
    /// `["path"]` out of the result bound to variable `cfg`.
    PriorResult { var: String, path: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    ForOf,
    While,
    DoWhile,
}

/// Per-task metadata the plan builder reads when lowering to a logical DAG.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub loop_id: Option<String>,
    pub loop_type: Option<LoopType>,
    pub loop_condition: Option<String>,
    pub layer_index: Option<u32>,
    /// Id of the enclosing branch control node, if any.
    pub branch_id: Option<String>,
    /// Which arm of the enclosing branch this node belongs to (`"then"`/`"else"`).
    pub arm: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Task {
        tool: ToolId,
        static_arguments: HashMap<String, ArgumentRef>,
        /// Variable the task's result is bound to, if the source assigned one.
        binding: Option<String>,
    },
    Control {
        branch: Option<BranchArm>,
        loop_type: Option<LoopType>,
        condition: Option<String>,
    },
    Sink,
}

/// One arm of a branch control node, in declaration order (ties in
/// `inferDecisions` resolve by this order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchArm {
    pub name: String,
    pub condition: Option<String>,
}

/// A branch choice inferred post-hoc by `inferDecisions`, given the tool
/// sequence a workflow actually executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub node_id: NodeId,
    pub arm_taken: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub metadata: NodeMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Output of `from` feeds an argument of `to`.
    DataFlow,
    /// `from` must occur before `to`, with no data dependency.
    Order,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
    /// For `DataFlow` edges, the argument name on `to` this edge feeds.
    pub argument: Option<String>,
}

/// The output of the Static Structure Builder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticStructure {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Bindings captured at parse time for literals with no runtime
    /// dependency (e.g. loop array literals).
    pub literal_bindings: HashMap<String, serde_json::Value>,
}

impl StaticStructure {
    #[must_use]
    pub fn task_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Task { .. }))
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
