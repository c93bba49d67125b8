//! Sqlite-backed storage for hypergraph nodes, edges, and membership.
//!
//! Grounded in the teacher's `memory::schema` nodes/hyperedges/membership
//! tables, with a `weight` column added for DR-DSP's shortest-hyperpath
//! queries. A single writer (this struct, behind the shared [`SqlitePool`]
//! mutex) with readers seeing a consistent snapshot per spec.md §5.

use super::types::{Hyperedge, HypergraphUpdate, NodeKind};
use crate::error::{Error, Result};
use crate::store::SqlitePool;
use rusqlite::params;

#[derive(Clone)]
pub struct HypergraphStore {
    pool: SqlitePool,
}

impl HypergraphStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply one update atomically. Queries issued after this call see the
    /// post-update snapshot (the shared connection mutex serializes writers
    /// and readers).
    pub fn apply_update(&self, update: &HypergraphUpdate) -> Result<()> {
        match update {
            HypergraphUpdate::NodeAdd { id, kind } => self.add_node(id, *kind),
            HypergraphUpdate::EdgeAdd { edge } => self.add_edge(edge),
            HypergraphUpdate::EdgeRemove { id } => self.remove_edge(id),
            HypergraphUpdate::EdgeReweight { id, weight } => self.reweight_edge(id, *weight),
        }
    }

    fn add_node(&self, id: &str, kind: NodeKind) -> Result<()> {
        let kind_str = match kind {
            NodeKind::Tool => "tool",
            NodeKind::Capability => "capability",
        };
        self.pool.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO hypergraph_nodes (id, kind) VALUES (?1, ?2)",
                params![id, kind_str],
            )?;
            Ok(())
        })
    }

    fn add_edge(&self, edge: &Hyperedge) -> Result<()> {
        let metadata = edge.metadata.to_string();
        self.pool.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO hypergraph_edges (id, weight, metadata) VALUES (?1, ?2, ?3)",
                params![edge.id, edge.weight, metadata],
            )?;
            conn.execute(
                "DELETE FROM hypergraph_membership WHERE edge_id = ?1",
                params![edge.id],
            )?;
            for source in &edge.sources {
                conn.execute(
                    "INSERT OR IGNORE INTO hypergraph_membership (edge_id, node_id, side) VALUES (?1, ?2, 'source')",
                    params![edge.id, source],
                )?;
            }
            for target in &edge.targets {
                conn.execute(
                    "INSERT OR IGNORE INTO hypergraph_membership (edge_id, node_id, side) VALUES (?1, ?2, 'target')",
                    params![edge.id, target],
                )?;
            }
            Ok(())
        })
    }

    fn remove_edge(&self, id: &str) -> Result<()> {
        self.pool.with_conn(|conn| {
            conn.execute("DELETE FROM hypergraph_membership WHERE edge_id = ?1", params![id])?;
            conn.execute("DELETE FROM hypergraph_edges WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    fn reweight_edge(&self, id: &str, weight: f64) -> Result<()> {
        self.pool.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE hypergraph_edges SET weight = ?2 WHERE id = ?1",
                params![id, weight],
            )?;
            if changed == 0 {
                return Err(Error::not_found(format!("hyperedge {id} not found")));
            }
            Ok(())
        })
    }

    /// All hyperedges in the current snapshot.
    pub fn all_edges(&self) -> Result<Vec<Hyperedge>> {
        self.pool.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, weight, metadata FROM hypergraph_edges")?;
            let edges = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let weight: f64 = row.get(1)?;
                    let metadata: String = row.get(2)?;
                    Ok((id, weight, metadata))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut out = Vec::with_capacity(edges.len());
            for (id, weight, metadata) in edges {
                let mut sources_stmt = conn.prepare(
                    "SELECT node_id FROM hypergraph_membership WHERE edge_id = ?1 AND side = 'source'",
                )?;
                let sources = sources_stmt
                    .query_map(params![id], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                let mut targets_stmt = conn.prepare(
                    "SELECT node_id FROM hypergraph_membership WHERE edge_id = ?1 AND side = 'target'",
                )?;
                let targets = targets_stmt
                    .query_map(params![id], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                out.push(Hyperedge {
                    id,
                    sources,
                    targets,
                    weight,
                    metadata: serde_json::from_str(&metadata)
                        .unwrap_or(serde_json::Value::Null),
                });
            }
            Ok(out)
        })
    }

    pub fn contains_node(&self, id: &str) -> Result<bool> {
        self.pool.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT count(*) FROM hypergraph_nodes WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_add_and_list_round_trips() {
        let store = HypergraphStore::new(SqlitePool::open_in_memory().unwrap());
        store.apply_update(&HypergraphUpdate::NodeAdd {
            id: "fs:read_file".to_string(),
            kind: NodeKind::Tool,
        })
        .unwrap();
        store.apply_update(&HypergraphUpdate::EdgeAdd {
            edge: Hyperedge {
                id: "e1".to_string(),
                sources: vec!["fs:read_file".to_string()],
                targets: vec!["cap-1".to_string()],
                weight: 0.2,
                metadata: serde_json::json!({}),
            },
        })
        .unwrap();

        let edges = store.all_edges().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].sources, vec!["fs:read_file".to_string()]);
    }

    #[test]
    fn reweight_missing_edge_errors() {
        let store = HypergraphStore::new(SqlitePool::open_in_memory().unwrap());
        let err = store
            .apply_update(&HypergraphUpdate::EdgeReweight {
                id: "missing".to_string(),
                weight: 0.5,
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
