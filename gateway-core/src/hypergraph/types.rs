//! Hypergraph data model (C5): nodes are tool ids or capability ids; a
//! hyperedge says "given `sources`, one can reach `targets` with `weight`".

use serde::{Deserialize, Serialize};

/// A hypergraph node is either a tool or a capability, addressed by its
/// string key (`ToolId::to_string()` or `CapabilityId::to_string()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Tool,
    Capability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hyperedge {
    pub id: String,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    pub weight: f64,
    pub metadata: serde_json::Value,
}

/// `weight = 1 - successRate`, clamped to `[0, 1]` (spec.md §4.3).
#[must_use]
pub fn capability_edge_weight(success_rate: f64) -> f64 {
    (1.0 - success_rate).clamp(0.0, 1.0)
}

/// `weight = 1.0 - recentToolSuccessRate`, clamped to `[0, 1]`.
#[must_use]
pub fn tool_edge_weight(recent_success_rate: f64) -> f64 {
    (1.0 - recent_success_rate).clamp(0.0, 1.0)
}

/// An incremental update to the hypergraph, applied atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HypergraphUpdate {
    EdgeAdd { edge: Hyperedge },
    EdgeRemove { id: String },
    EdgeReweight { id: String, weight: f64 },
    NodeAdd { id: String, kind: NodeKind },
}

/// Result of [`super::engine::find_shortest_hyperpath`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperpathResult {
    pub found: bool,
    pub total_weight: f64,
    pub node_sequence: Vec<String>,
    pub edges: Vec<String>,
}

impl HyperpathResult {
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            found: false,
            total_weight: f64::INFINITY,
            node_sequence: Vec::new(),
            edges: Vec::new(),
        }
    }
}
