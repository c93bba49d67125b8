//! SHGAT Ranker (C6): scores every registered capability against an intent
//! embedding using a small K-head attention model, trained online from
//! prioritized execution traces.
//!
//! Grounded on the teacher's `reasoning`-module online-update style (read
//! current parameters, compute a step, publish new parameters) and on
//! `tool::ToolRegistry`'s `RwLock<HashMap<..>>` node-table pattern. The
//! non-reentrant training flag is a plain `AtomicBool`, matching spec.md
//! §9's carve-out for a process-wide flag as the one permitted global.

mod types;

pub use types::{
    CapabilityNode, FeatureContributions, Parameters, ScoredCapability, TrainExample, HEAD_COUNT,
};

use crate::error::{Error, Result};
use crate::hypergraph::Hyperedge;
use crate::hypergraph::HypergraphStore;
use crate::ids::CapabilityId;
use crate::tool::ToolId;
use crate::trace::TraceStore;
use crate::vector::Vector;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

const MAX_SCORE: f64 = 0.95;
const RECURSION_DEPTH: u8 = 2;
const LEARNING_RATE: f64 = 0.05;
const RECENCY_HALF_LIFE_HOURS: f64 = 24.0;

pub struct SHGATRanker {
    hypergraph: HypergraphStore,
    tools: RwLock<HashMap<ToolId, Vector>>,
    capabilities: RwLock<HashMap<CapabilityId, CapabilityNode>>,
    params: RwLock<Parameters>,
    training_in_progress: AtomicBool,
    training_enabled: bool,
}

impl SHGATRanker {
    #[must_use]
    pub fn new(hypergraph: HypergraphStore, training_enabled: bool) -> Self {
        Self {
            hypergraph,
            tools: RwLock::new(HashMap::new()),
            capabilities: RwLock::new(HashMap::new()),
            params: RwLock::new(Parameters::default()),
            training_in_progress: AtomicBool::new(false),
            training_enabled,
        }
    }

    pub fn register_tool(&self, id: ToolId, embedding: Vector) {
        self.tools
            .write()
            .expect("ranker tool table lock poisoned")
            .insert(id, embedding);
    }

    #[must_use]
    pub fn has_tool_node(&self, id: &ToolId) -> bool {
        self.tools
            .read()
            .expect("ranker tool table lock poisoned")
            .contains_key(id)
    }

    pub fn register_capability(&self, node: CapabilityNode) {
        self.capabilities
            .write()
            .expect("ranker capability table lock poisoned")
            .insert(node.id, node);
    }

    /// Score every registered capability against `intent_embedding`, sorted
    /// descending. Ties break on `successRate` descending, then `fqdn`
    /// ascending (spec.md §9 open-question decision).
    pub fn score_all_capabilities(&self, intent_embedding: &Vector) -> Result<Vec<ScoredCapability>> {
        let edges = self.hypergraph.all_edges()?;
        let params = self.params.read().expect("ranker params lock poisoned").clone();
        let capabilities = self
            .capabilities
            .read()
            .expect("ranker capability table lock poisoned");

        let mut scored: Vec<ScoredCapability> = capabilities
            .values()
            .map(|cap| self.score_one(cap, intent_embedding, &edges, &params))
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let sa = capabilities.get(&a.capability_id).map(|c| c.success_rate);
                    let sb = capabilities.get(&b.capability_id).map(|c| c.success_rate);
                    sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    let fa = capabilities.get(&a.capability_id).map(|c| c.fqdn.as_str());
                    let fb = capabilities.get(&b.capability_id).map(|c| c.fqdn.as_str());
                    fa.cmp(&fb)
                })
        });
        Ok(scored)
    }

    fn score_one(
        &self,
        cap: &CapabilityNode,
        intent: &Vector,
        edges: &[Hyperedge],
        params: &Parameters,
    ) -> ScoredCapability {
        let recursive_contribution = recursive_contribution(&cap.id.to_string(), edges, RECURSION_DEPTH);
        let features = FeatureContributions {
            semantic: ((intent.cosine_similarity(&cap.embedding) as f64 + 1.0) / 2.0).clamp(0.0, 1.0),
            structure: recursive_contribution.clamp(0.0, 1.0),
            temporal: recency_signal(cap.last_used_at),
            reliability: cap.success_rate.clamp(0.0, 1.0),
        };

        if !self.training_enabled {
            let fallback =
                (((intent.cosine_similarity(&cap.embedding) as f64) * features.reliability)).clamp(0.0, MAX_SCORE);
            return ScoredCapability {
                capability_id: cap.id,
                score: fallback,
                head_scores: Vec::new(),
                head_weights: Vec::new(),
                recursive_contribution,
                feature_contributions: features,
            };
        }

        let (score, head_scores, head_weights) = fuse(params, &features);
        ScoredCapability {
            capability_id: cap.id,
            score,
            head_scores,
            head_weights,
            recursive_contribution,
            feature_contributions: features,
        }
    }

    /// Single-example online update. Returns [`Error::TrainingBusy`] if a
    /// training session is already in progress -- the caller must drop the
    /// request, not retry or surface it to a user (spec.md §4.4, §7).
    pub fn train_on_example(&self, example: &TrainExample) -> Result<f64> {
        if !self.training_enabled {
            return Ok(0.0);
        }
        self.with_training_lock(|| self.train_locked(example))
    }

    /// Sample a prioritized batch from `traces` and run one training session
    /// over it, writing updated priorities back as we go.
    pub fn train_from_replay(
        &self,
        traces: &TraceStore,
        batch_size: usize,
        rng: &mut impl Rng,
    ) -> Result<()> {
        if !self.training_enabled {
            return Ok(());
        }
        self.with_training_lock(|| {
            let batch = traces.sample_batch(batch_size, rng)?;
            for trace in batch {
                let Some(candidate_id) = trace.capability_id else {
                    continue;
                };
                let example = TrainExample {
                    intent_embedding: trace.intent_embedding.clone(),
                    context_tools: trace.executed_path.clone(),
                    candidate_id,
                    outcome: trace.success,
                };
                let loss = self.train_locked(&example)?;
                traces.update_priority(trace.id, loss)?;
            }
            Ok(())
        })
    }

    fn with_training_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if self
            .training_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::TrainingBusy);
        }
        let result = f();
        self.training_in_progress.store(false, Ordering::SeqCst);
        result
    }

    fn train_locked(&self, example: &TrainExample) -> Result<f64> {
        let cap = self
            .capabilities
            .read()
            .expect("ranker capability table lock poisoned")
            .get(&example.candidate_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("unregistered capability {}", example.candidate_id)))?;
        let edges = self.hypergraph.all_edges()?;
        let mut params = self.params.read().expect("ranker params lock poisoned").clone();

        let recursive_contribution = recursive_contribution(&cap.id.to_string(), &edges, RECURSION_DEPTH);
        let features = FeatureContributions {
            semantic: ((example.intent_embedding.cosine_similarity(&cap.embedding) as f64 + 1.0) / 2.0)
                .clamp(0.0, 1.0),
            structure: recursive_contribution.clamp(0.0, 1.0),
            temporal: recency_signal(cap.last_used_at),
            reliability: cap.success_rate.clamp(0.0, 1.0),
        };

        let (predicted, head_scores, head_weights) = fuse(&params, &features);
        let target = if example.outcome { 1.0 } else { 0.0 };
        let error = target - predicted;

        let feature_array = features.as_array();
        for k in 0..HEAD_COUNT {
            for j in 0..4 {
                params.head_feature_weights[k][j] +=
                    LEARNING_RATE * error * head_weights[k] * feature_array[j];
                params.head_feature_weights[k][j] = params.head_feature_weights[k][j].clamp(-5.0, 5.0);
            }
            params.head_fusion_weights[k] += LEARNING_RATE * error * head_scores[k];
            params.head_fusion_weights[k] = params.head_fusion_weights[k].max(0.0);
        }

        *self.params.write().expect("ranker params lock poisoned") = params;
        Ok(error * error)
    }

    #[must_use]
    pub fn export_parameters(&self) -> Parameters {
        self.params.read().expect("ranker params lock poisoned").clone()
    }

    pub fn import_parameters(&self, state: Parameters) {
        *self.params.write().expect("ranker params lock poisoned") = state;
    }
}

fn fuse(params: &Parameters, features: &FeatureContributions) -> (f64, Vec<f64>, Vec<f64>) {
    let feature_array = features.as_array();
    let head_scores: Vec<f64> = params
        .head_feature_weights
        .iter()
        .map(|weights| {
            weights
                .iter()
                .zip(feature_array.iter())
                .map(|(w, f)| w * f)
                .sum::<f64>()
                .clamp(0.0, 1.0)
        })
        .collect();

    let fusion_sum: f64 = params.head_fusion_weights.iter().sum();
    let head_weights: Vec<f64> = if fusion_sum > 0.0 {
        params.head_fusion_weights.iter().map(|w| w / fusion_sum).collect()
    } else {
        vec![1.0 / HEAD_COUNT as f64; HEAD_COUNT]
    };

    let fused: f64 = head_scores
        .iter()
        .zip(head_weights.iter())
        .map(|(s, w)| s * w)
        .sum();
    let score = (fused * features.reliability).clamp(0.0, MAX_SCORE);
    (score, head_scores, head_weights)
}

/// Structural signal: how much settled shortest-hyperpath "credit" flows
/// into `node_id` from its hyperedge neighborhood, decayed by distance.
fn recursive_contribution(node_id: &str, edges: &[Hyperedge], depth: u8) -> f64 {
    if depth == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for edge in edges.iter().filter(|e| e.targets.iter().any(|t| t == node_id)) {
        if edge.sources.is_empty() {
            continue;
        }
        let edge_gain = (1.0 - edge.weight).clamp(0.0, 1.0);
        let source_sum: f64 = edge
            .sources
            .iter()
            .map(|s| 1.0 + recursive_contribution(s, edges, depth - 1))
            .sum();
        total += edge_gain * source_sum / edge.sources.len() as f64;
    }
    total.clamp(0.0, 1.0)
}

fn recency_signal(last_used_at: chrono::DateTime<chrono::Utc>) -> f64 {
    let hours = (chrono::Utc::now() - last_used_at).num_seconds().max(0) as f64 / 3600.0;
    (-hours / RECENCY_HALF_LIFE_HOURS).exp().clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqlitePool;

    fn ranker(training_enabled: bool) -> SHGATRanker {
        SHGATRanker::new(
            HypergraphStore::new(SqlitePool::open_in_memory().unwrap()),
            training_enabled,
        )
    }

    fn node(id: CapabilityId, fqdn: &str, success_rate: f64) -> CapabilityNode {
        CapabilityNode {
            id,
            fqdn: fqdn.to_string(),
            embedding: Vector::new(vec![1.0, 0.0]).unwrap(),
            members: vec![ToolId::parse("fs:read_file").unwrap()],
            hierarchy_level: 0,
            success_rate,
            children: Vec::new(),
            parents: Vec::new(),
            last_used_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn scores_are_bounded_and_sorted_descending() {
        let ranker = ranker(true);
        let a = CapabilityId::new();
        let b = CapabilityId::new();
        ranker.register_capability(node(a, "local.default.fs.a.aaaa", 1.0));
        ranker.register_capability(node(b, "local.default.fs.b.bbbb", 0.2));

        let intent = Vector::new(vec![1.0, 0.0]).unwrap();
        let scores = ranker.score_all_capabilities(&intent).unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores.iter().all(|s| (0.0..=0.95).contains(&s.score)));
        assert!(scores[0].score >= scores[1].score);
    }

    #[test]
    fn tie_break_prefers_higher_success_rate_then_fqdn() {
        let ranker = ranker(true);
        let a = CapabilityId::new();
        let b = CapabilityId::new();
        // Identical embeddings and identical structural/temporal signal ->
        // the scores tie, so the ordering must fall back to the spec's rule.
        let mut na = node(a, "local.default.fs.b_low.aaaa", 0.5);
        let mut nb = node(b, "local.default.fs.a_high.bbbb", 0.9);
        na.last_used_at = chrono::Utc::now();
        nb.last_used_at = na.last_used_at;
        ranker.register_capability(na);
        ranker.register_capability(nb);

        let intent = Vector::new(vec![1.0, 0.0]).unwrap();
        let scores = ranker.score_all_capabilities(&intent).unwrap();
        assert_eq!(scores[0].capability_id, b, "higher success rate ranks first");
    }

    #[test]
    fn training_flag_rejects_concurrent_sessions() {
        let ranker = ranker(true);
        ranker.training_in_progress.store(true, Ordering::SeqCst);
        let example = TrainExample {
            intent_embedding: Vector::new(vec![1.0, 0.0]).unwrap(),
            context_tools: Vec::new(),
            candidate_id: CapabilityId::new(),
            outcome: true,
        };
        let err = ranker.train_on_example(&example).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TrainingBusy);
    }

    #[test]
    fn fallback_ranking_used_when_training_disabled() {
        let ranker = ranker(false);
        let id = CapabilityId::new();
        ranker.register_capability(node(id, "local.default.fs.a.aaaa", 1.0));
        let intent = Vector::new(vec![1.0, 0.0]).unwrap();
        let scores = ranker.score_all_capabilities(&intent).unwrap();
        assert_eq!(scores[0].head_scores.len(), 0);
        assert!((0.0..=0.95).contains(&scores[0].score));
    }

    #[test]
    fn train_on_example_nudges_parameters() {
        let ranker = ranker(true);
        let id = CapabilityId::new();
        ranker.register_capability(node(id, "local.default.fs.a.aaaa", 1.0));
        let before = ranker.export_parameters();
        let example = TrainExample {
            intent_embedding: Vector::new(vec![1.0, 0.0]).unwrap(),
            context_tools: Vec::new(),
            candidate_id: id,
            outcome: true,
        };
        ranker.train_on_example(&example).unwrap();
        let after = ranker.export_parameters();
        assert_ne!(before.head_fusion_weights, after.head_fusion_weights);
    }
}
