//! SHGAT data model: registered nodes, learned parameters, and scoring
//! output.

use crate::ids::CapabilityId;
use crate::tool::ToolId;
use crate::vector::Vector;
use serde::{Deserialize, Serialize};

/// Number of attention heads. Fixed rather than configurable: each head's
/// feature weights are learned online, so adding heads mid-flight would
/// orphan whatever the existing heads already learned.
pub const HEAD_COUNT: usize = 4;

/// A capability as the ranker sees it: just enough to compute the four head
/// signals, decoupled from [`crate::capability::CapabilityRecord`] so the
/// ranker doesn't need a registry round-trip to score.
#[derive(Debug, Clone)]
pub struct CapabilityNode {
    pub id: CapabilityId,
    pub fqdn: String,
    pub embedding: Vector,
    pub members: Vec<ToolId>,
    pub hierarchy_level: u32,
    pub success_rate: f64,
    pub children: Vec<CapabilityId>,
    pub parents: Vec<CapabilityId>,
    pub last_used_at: chrono::DateTime<chrono::Utc>,
}

/// Per-head learned weights plus the fusion weights combining heads into one
/// score. `exportParameters`/`importParameters` persist exactly this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    /// `head_feature_weights[k]` is this head's weight over
    /// `[semantic, structure, temporal, reliability]`.
    pub head_feature_weights: Vec<[f64; 4]>,
    /// Fusion weight for each head's score.
    pub head_fusion_weights: Vec<f64>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            head_feature_weights: vec![[0.25, 0.25, 0.25, 0.25]; HEAD_COUNT],
            head_fusion_weights: vec![1.0 / HEAD_COUNT as f64; HEAD_COUNT],
        }
    }
}

/// The four raw per-capability signals, each normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureContributions {
    pub semantic: f64,
    pub structure: f64,
    pub temporal: f64,
    pub reliability: f64,
}

impl FeatureContributions {
    pub(super) fn as_array(&self) -> [f64; 4] {
        [self.semantic, self.structure, self.temporal, self.reliability]
    }
}

/// One capability's score from [`super::SHGATRanker::score_all_capabilities`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCapability {
    pub capability_id: CapabilityId,
    pub score: f64,
    pub head_scores: Vec<f64>,
    pub head_weights: Vec<f64>,
    pub recursive_contribution: f64,
    pub feature_contributions: FeatureContributions,
}

/// A single online training example (one execution outcome).
pub struct TrainExample {
    pub intent_embedding: Vector,
    pub context_tools: Vec<ToolId>,
    pub candidate_id: CapabilityId,
    pub outcome: bool,
}
