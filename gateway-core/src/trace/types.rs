//! Trace type: the causally-ordered record of one execution.

use crate::ids::{CapabilityId, TraceId};
use crate::static_structure::Decision;
use crate::tool::ToolId;
use crate::vector::Vector;
use serde::{Deserialize, Serialize};

/// Per-execution record fed back into C2 (dedup), C5 (hyperedge insertion),
/// C6 (training), and C7 (posterior update).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: TraceId,
    pub capability_id: Option<CapabilityId>,
    pub intent: String,
    pub executed_path: Vec<ToolId>,
    pub task_results: serde_json::Value,
    pub decisions: Vec<Decision>,
    pub duration_ms: u64,
    pub success: bool,
    pub intent_embedding: Vector,
    /// Non-negative; drives PER sampling probability.
    pub priority: f64,
}

impl Trace {
    /// Construct a trace with the default initial priority (maximal, so new
    /// traces are seen at least once by the replay sampler).
    #[must_use]
    pub fn new(
        capability_id: Option<CapabilityId>,
        intent: String,
        executed_path: Vec<ToolId>,
        task_results: serde_json::Value,
        decisions: Vec<Decision>,
        duration_ms: u64,
        success: bool,
        intent_embedding: Vector,
    ) -> Self {
        Self {
            id: TraceId::new(),
            capability_id,
            intent,
            executed_path,
            task_results,
            decisions,
            duration_ms,
            success,
            intent_embedding,
            priority: 1.0,
        }
    }
}
