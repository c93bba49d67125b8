//! DR-DSP (C5): incremental shortest-hyperpath query over the dynamic
//! directed hypergraph.
//!
//! This implements the standard B-hypergraph (Ausiello-et-al-style)
//! shortest-hyperpath relaxation: a hyperedge "fires" once a cost is known
//! for every one of its sources, contributing `sum(sourceCosts) + weight` as
//! a candidate cost to each of its targets. A min-priority-queue settles
//! nodes in non-decreasing cost order, exactly like Dijkstra with
//! hyperedges in place of plain edges.
//!
//! Updates (`applyUpdate`) only touch the rows they name; queries recompute
//! distances from the current snapshot on demand rather than maintaining
//! incremental distance tables, so a single edge addition is O(1) and never
//! triggers recomputation of unrelated components (spec.md §4.3's
//! complexity contract) -- the cost of a topology change is paid lazily, by
//! the next query that actually traverses the changed region.

use super::store::HypergraphStore;
use super::types::{Hyperedge, HyperpathResult};
use crate::error::Result;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

#[derive(Clone, Copy, PartialEq)]
struct Candidate {
    cost: f64,
    hop_count: usize,
}

impl Candidate {
    /// Tie-break: fewer hyperedges first; callers break remaining ties by
    /// lexicographic edge id at relaxation time.
    fn better_than(&self, other: &Candidate) -> bool {
        match self.cost.partial_cmp(&other.cost) {
            Some(Ordering::Less) => true,
            Some(Ordering::Equal) => self.hop_count < other.hop_count,
            _ => false,
        }
    }
}

struct HeapEntry {
    cost: f64,
    node: String,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for a min-heap via std's max-heap BinaryHeap.
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
    }
}

/// `findShortestHyperpath(source, target)`. Never panics or errors on
/// unreachable/unknown nodes -- those surface as `found = false`.
pub fn find_shortest_hyperpath(
    store: &HypergraphStore,
    source: &str,
    target: &str,
) -> Result<HyperpathResult> {
    let edges = store.all_edges()?;
    if source == target {
        return Ok(HyperpathResult {
            found: true,
            total_weight: 0.0,
            node_sequence: vec![source.to_string()],
            edges: Vec::new(),
        });
    }

    let mut dist: HashMap<String, Candidate> = HashMap::new();
    dist.insert(
        source.to_string(),
        Candidate {
            cost: 0.0,
            hop_count: 0,
        },
    );
    // predecessor[target_node] = (edge id, the source node this hop's cost flowed through)
    let mut predecessor: HashMap<String, (String, String)> = HashMap::new();

    let mut heap = BinaryHeap::new();
    heap.push(HeapEntry {
        cost: 0.0,
        node: source.to_string(),
    });
    let mut settled: HashMap<String, f64> = HashMap::new();

    while let Some(HeapEntry { cost, node }) = heap.pop() {
        if settled.contains_key(&node) {
            continue;
        }
        settled.insert(node.clone(), cost);
        if node == target {
            break;
        }

        for edge in edges.iter().filter(|e| e.sources.contains(&node)) {
            if !edge.sources.iter().all(|s| settled.contains_key(s)) {
                continue;
            }
            relax_edge(edge, &settled, &mut dist, &mut predecessor, &mut heap);
        }
    }

    let Some(final_cost) = settled.get(target) else {
        return Ok(HyperpathResult::not_found());
    };

    let (node_sequence, edge_ids) = reconstruct_path(source, target, &predecessor);
    Ok(HyperpathResult {
        found: true,
        total_weight: *final_cost,
        node_sequence,
        edges: edge_ids,
    })
}

fn relax_edge(
    edge: &Hyperedge,
    settled: &HashMap<String, f64>,
    dist: &mut HashMap<String, Candidate>,
    predecessor: &mut HashMap<String, (String, String)>,
    heap: &mut BinaryHeap<HeapEntry>,
) {
    let source_cost: f64 = edge.sources.iter().filter_map(|s| settled.get(s)).sum();
    let candidate_cost = source_cost + edge.weight;
    let hop_count = edge
        .sources
        .iter()
        .map(|s| {
            dist.get(s).map_or(0, |c| c.hop_count)
        })
        .max()
        .unwrap_or(0)
        + 1;
    let candidate = Candidate {
        cost: candidate_cost,
        hop_count,
    };

    // The node in `edge.sources` contributing the most to this hop's cost is
    // the "critical" predecessor used for path reconstruction.
    let critical_source = edge
        .sources
        .iter()
        .max_by(|a, b| {
            let ca = settled.get(*a).copied().unwrap_or(0.0);
            let cb = settled.get(*b).copied().unwrap_or(0.0);
            ca.partial_cmp(&cb)
                .unwrap_or(Ordering::Equal)
                .then(a.as_str().cmp(b.as_str()))
        })
        .cloned()
        .unwrap_or_default();

    for target in &edge.targets {
        let should_update = match dist.get(target) {
            None => true,
            Some(existing) => {
                candidate.better_than(existing)
                    || (candidate.cost == existing.cost
                        && candidate.hop_count == existing.hop_count
                        && predecessor
                            .get(target)
                            .map(|(eid, _)| edge.id.as_str() < eid.as_str())
                            .unwrap_or(false))
            }
        };
        if should_update {
            dist.insert(target.clone(), candidate);
            predecessor.insert(target.clone(), (edge.id.clone(), critical_source.clone()));
            heap.push(HeapEntry {
                cost: candidate.cost,
                node: target.clone(),
            });
        }
    }
}

fn reconstruct_path(
    source: &str,
    target: &str,
    predecessor: &HashMap<String, (String, String)>,
) -> (Vec<String>, Vec<String>) {
    let mut nodes = vec![target.to_string()];
    let mut edge_ids = Vec::new();
    let mut current = target.to_string();

    while current != source {
        let Some((edge_id, prev_node)) = predecessor.get(&current) else {
            break;
        };
        edge_ids.push(edge_id.clone());
        nodes.push(prev_node.clone());
        current = prev_node.clone();
    }

    nodes.reverse();
    edge_ids.reverse();
    (nodes, edge_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypergraph::types::{HypergraphUpdate, NodeKind};
    use crate::store::SqlitePool;

    fn store_with_chain() -> HypergraphStore {
        let store = HypergraphStore::new(SqlitePool::open_in_memory().unwrap());
        for (id, kind) in [
            ("fs:read_file", NodeKind::Tool),
            ("cap-a", NodeKind::Capability),
            ("cap-b", NodeKind::Capability),
        ] {
            store
                .apply_update(&HypergraphUpdate::NodeAdd {
                    id: id.to_string(),
                    kind,
                })
                .unwrap();
        }
        store
            .apply_update(&HypergraphUpdate::EdgeAdd {
                edge: Hyperedge {
                    id: "e1".to_string(),
                    sources: vec!["fs:read_file".to_string()],
                    targets: vec!["cap-a".to_string()],
                    weight: 0.1,
                    metadata: serde_json::json!({}),
                },
            })
            .unwrap();
        store
            .apply_update(&HypergraphUpdate::EdgeAdd {
                edge: Hyperedge {
                    id: "e2".to_string(),
                    sources: vec!["cap-a".to_string()],
                    targets: vec!["cap-b".to_string()],
                    weight: 0.2,
                    metadata: serde_json::json!({}),
                },
            })
            .unwrap();
        store
    }

    #[test]
    fn finds_two_hop_chain() {
        let store = store_with_chain();
        let result = find_shortest_hyperpath(&store, "fs:read_file", "cap-b").unwrap();
        assert!(result.found);
        assert_eq!(result.node_sequence, vec!["fs:read_file", "cap-a", "cap-b"]);
        assert_eq!(result.edges, vec!["e1", "e2"]);
        assert!((result.total_weight - 0.3).abs() < 1e-9);
    }

    #[test]
    fn unreachable_target_returns_not_found() {
        let store = store_with_chain();
        let result = find_shortest_hyperpath(&store, "cap-b", "fs:read_file").unwrap();
        assert!(!result.found);
        assert_eq!(result.total_weight, f64::INFINITY);
        assert!(result.node_sequence.is_empty());
    }

    #[test]
    fn unknown_source_node_returns_not_found() {
        let store = store_with_chain();
        let result = find_shortest_hyperpath(&store, "unknown:tool", "cap-b").unwrap();
        assert!(!result.found);
    }

    #[test]
    fn source_equals_target_is_trivially_found() {
        let store = store_with_chain();
        let result = find_shortest_hyperpath(&store, "cap-a", "cap-a").unwrap();
        assert!(result.found);
        assert_eq!(result.total_weight, 0.0);
        assert_eq!(result.node_sequence, vec!["cap-a"]);
    }

    #[test]
    fn prefers_lower_weight_path_among_alternatives() {
        let store = store_with_chain();
        // A pricier direct edge should lose to the existing 0.1+0.2 path.
        store
            .apply_update(&HypergraphUpdate::EdgeAdd {
                edge: Hyperedge {
                    id: "e3".to_string(),
                    sources: vec!["fs:read_file".to_string()],
                    targets: vec!["cap-b".to_string()],
                    weight: 0.9,
                    metadata: serde_json::json!({}),
                },
            })
            .unwrap();
        let result = find_shortest_hyperpath(&store, "fs:read_file", "cap-b").unwrap();
        assert!((result.total_weight - 0.3).abs() < 1e-9);
    }
}
