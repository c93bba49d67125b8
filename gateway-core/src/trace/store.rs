//! Trace Store (C3): append-only log of execution traces with
//! priority-weighted sampling for SHGAT's Prioritized Experience Replay.

use super::types::Trace;
use crate::error::{Error, Result};
use crate::ids::{CapabilityId, TraceId};
use crate::static_structure::Decision;
use crate::store::SqlitePool;
use crate::tool::ToolId;
use crate::vector::Vector;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rusqlite::{params, OptionalExtension, Row};

#[derive(Clone)]
pub struct TraceStore {
    pool: SqlitePool,
}

impl TraceStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a trace. Appends are serialized by the shared connection,
    /// satisfying spec.md §5's "serialized globally" requirement.
    pub fn append(&self, trace: &Trace) -> Result<()> {
        let executed_path = serde_json::to_string(&trace.executed_path)?;
        let decisions = serde_json::to_string(&trace.decisions)?;
        let embedding = serde_json::to_string(trace.intent_embedding.as_slice())?;
        self.pool.with_conn(|conn| {
            conn.execute(
                "INSERT INTO traces
                    (id, capability_id, intent, executed_path, task_results, decisions,
                     duration_ms, success, intent_embedding, priority, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                params![
                    trace.id.to_string(),
                    trace.capability_id.map(|id| id.to_string()),
                    trace.intent,
                    executed_path,
                    trace.task_results.to_string(),
                    decisions,
                    trace.duration_ms,
                    trace.success,
                    embedding,
                    trace.priority,
                    chrono::Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, id: TraceId) -> Result<Option<Trace>> {
        self.pool.with_conn(|conn| {
            conn.query_row(
                "SELECT id, capability_id, intent, executed_path, task_results, decisions,
                        duration_ms, success, intent_embedding, priority
                 FROM traces WHERE id = ?1",
                params![id.to_string()],
                row_to_trace,
            )
            .optional()
            .map_err(Error::from)
        })
    }

    /// Priority update on a separate path from the append path, per spec.md §5.
    pub fn update_priority(&self, id: TraceId, priority: f64) -> Result<()> {
        let priority = priority.max(0.0);
        self.pool.with_conn(|conn| {
            conn.execute(
                "UPDATE traces SET priority = ?2 WHERE id = ?1",
                params![id.to_string(), priority],
            )?;
            Ok(())
        })
    }

    /// Sample `n` traces with replacement, with probability proportional to
    /// `priority` (C6's PER batch). Returns fewer than `n` only if the store
    /// is empty.
    pub fn sample_batch(&self, n: usize, rng: &mut impl Rng) -> Result<Vec<Trace>> {
        let all = self.all()?;
        if all.is_empty() || n == 0 {
            return Ok(Vec::new());
        }
        let weights: Vec<f64> = all.iter().map(|t| t.priority.max(1e-6)).collect();
        let dist = WeightedIndex::new(&weights)
            .map_err(|e| Error::Internal(format!("invalid PER weights: {e}")))?;
        Ok((0..n).map(|_| all[dist.sample(rng)].clone()).collect())
    }

    fn all(&self) -> Result<Vec<Trace>> {
        self.pool.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, capability_id, intent, executed_path, task_results, decisions,
                        duration_ms, success, intent_embedding, priority
                 FROM traces",
            )?;
            let rows = stmt.query_map([], row_to_trace)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
        })
    }
}

fn row_to_trace(row: &Row<'_>) -> rusqlite::Result<Trace> {
    let id: String = row.get(0)?;
    let capability_id: Option<String> = row.get(1)?;
    let executed_path: String = row.get(3)?;
    let task_results: String = row.get(4)?;
    let decisions: String = row.get(5)?;
    let embedding: String = row.get(8)?;
    Ok(Trace {
        id: TraceId::parse(&id).map_err(to_sqlite_err)?,
        capability_id: capability_id
            .map(|s| CapabilityId::parse(&s))
            .transpose()
            .map_err(to_sqlite_err)?,
        intent: row.get(2)?,
        executed_path: serde_json::from_str::<Vec<ToolId>>(&executed_path).map_err(to_sqlite_err)?,
        task_results: serde_json::from_str(&task_results).map_err(to_sqlite_err)?,
        decisions: serde_json::from_str::<Vec<Decision>>(&decisions).map_err(to_sqlite_err)?,
        duration_ms: row.get(6)?,
        success: row.get(7)?,
        intent_embedding: Vector::new(serde_json::from_str(&embedding).map_err(to_sqlite_err)?)
            .map_err(to_sqlite_err)?,
        priority: row.get(9)?,
    })
}

fn to_sqlite_err(err: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(0, err.to_string(), rusqlite::types::Type::Text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trace(priority: f64) -> Trace {
        let mut trace = Trace::new(
            None,
            "read JSON config".to_string(),
            vec![ToolId::parse("fs:read_file").unwrap()],
            serde_json::json!({}),
            Vec::new(),
            42,
            true,
            Vector::new(vec![1.0, 0.0]).unwrap(),
        );
        trace.priority = priority;
        trace
    }

    #[test]
    fn append_and_get_round_trips() {
        let store = TraceStore::new(SqlitePool::open_in_memory().unwrap());
        let trace = sample_trace(1.0);
        store.append(&trace).unwrap();
        let fetched = store.get(trace.id).unwrap().unwrap();
        assert_eq!(fetched.intent, trace.intent);
        assert_eq!(fetched.executed_path, trace.executed_path);
    }

    #[test]
    fn update_priority_clamps_to_non_negative() {
        let store = TraceStore::new(SqlitePool::open_in_memory().unwrap());
        let trace = sample_trace(1.0);
        store.append(&trace).unwrap();
        store.update_priority(trace.id, -5.0).unwrap();
        let fetched = store.get(trace.id).unwrap().unwrap();
        assert_eq!(fetched.priority, 0.0);
    }

    #[test]
    fn sample_batch_favors_higher_priority() {
        let store = TraceStore::new(SqlitePool::open_in_memory().unwrap());
        let high = sample_trace(100.0);
        let low = sample_trace(0.0001);
        store.append(&high).unwrap();
        store.append(&low).unwrap();

        let mut rng = rand::rngs::mock::StepRng::new(0, 1 << 32);
        let batch = store.sample_batch(16, &mut rng).unwrap();
        let high_count = batch.iter().filter(|t| t.id == high.id).count();
        assert!(high_count >= batch.len() / 2);
    }

    #[test]
    fn sample_batch_on_empty_store_is_empty() {
        let store = TraceStore::new(SqlitePool::open_in_memory().unwrap());
        let mut rng = rand::thread_rng();
        assert!(store.sample_batch(16, &mut rng).unwrap().is_empty());
    }
}
