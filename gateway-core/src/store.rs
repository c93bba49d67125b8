//! Shared sqlite-backed persistence: connection setup, schema, and the
//! `with_conn` access pattern every stateful component builds on.
//!
//! Grounded in the teacher's `memory::store::SqliteMemoryStore`: one
//! `Arc<Mutex<Connection>>` per process, WAL mode for concurrent readers, and
//! a small helper that maps `rusqlite::Error` into this crate's `Error`.
//! Components (registry, trace store, hypergraph, threshold manager,
//! checkpoints) each own their tables but share the same connection so a
//! single writer transaction can touch more than one of them when an
//! operation spans components (e.g. `recordUsage` plus a hyperedge reweight).

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A clonable handle to the shared sqlite connection.
#[derive(Clone)]
pub struct SqlitePool(Arc<Mutex<Connection>>);

impl SqlitePool {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        Ok(Self(Arc::new(Mutex::new(conn))))
    }

    /// An in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self(Arc::new(Mutex::new(conn))))
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(conn)?;
        Ok(())
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.0.lock().expect("sqlite connection lock poisoned");
        f(&conn)
    }
}

/// Create every table listed in the persistent state layout, if absent.
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS capability_records (
            id              TEXT PRIMARY KEY,
            org             TEXT NOT NULL,
            project         TEXT NOT NULL,
            namespace       TEXT NOT NULL,
            action          TEXT NOT NULL,
            short_hash      TEXT NOT NULL,
            fqdn            TEXT NOT NULL,
            code_hash       TEXT NOT NULL,
            workflow_pattern_id TEXT NOT NULL,
            created_by      TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            version         INTEGER NOT NULL,
            verified        INTEGER NOT NULL,
            visibility      TEXT NOT NULL,
            routing         TEXT NOT NULL,
            tags            TEXT NOT NULL,
            usage_count     INTEGER NOT NULL,
            success_count   INTEGER NOT NULL,
            total_latency_ms INTEGER NOT NULL,
            UNIQUE(org, project, fqdn),
            UNIQUE(org, project, code_hash)
        );
        CREATE INDEX IF NOT EXISTS idx_capability_records_name
            ON capability_records(org, project, namespace, action);

        CREATE TABLE IF NOT EXISTS workflow_patterns (
            id                TEXT PRIMARY KEY,
            code_hash         TEXT NOT NULL,
            code_snippet      TEXT NOT NULL,
            intent            TEXT NOT NULL,
            tools_used        TEXT NOT NULL,
            parameters_schema TEXT,
            description       TEXT,
            intent_embedding  BLOB NOT NULL,
            success_count     INTEGER NOT NULL,
            usage_count       INTEGER NOT NULL,
            total_latency_ms  INTEGER NOT NULL,
            hierarchy_level   INTEGER NOT NULL,
            children          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS traces (
            id                TEXT PRIMARY KEY,
            capability_id     TEXT,
            intent            TEXT NOT NULL,
            executed_path     TEXT NOT NULL,
            task_results      TEXT NOT NULL,
            decisions         TEXT NOT NULL,
            duration_ms       INTEGER NOT NULL,
            success           INTEGER NOT NULL,
            intent_embedding  BLOB NOT NULL,
            priority          REAL NOT NULL,
            created_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_traces_priority ON traces(priority);

        CREATE TABLE IF NOT EXISTS checkpoints (
            workflow_id       TEXT NOT NULL,
            layer             INTEGER NOT NULL,
            serialized_state  TEXT NOT NULL,
            created_at        TEXT NOT NULL,
            PRIMARY KEY (workflow_id, layer)
        );

        CREATE TABLE IF NOT EXISTS active_workflows (
            workflow_id       TEXT PRIMARY KEY,
            status            TEXT NOT NULL,
            current_layer     INTEGER NOT NULL,
            total_layers      INTEGER NOT NULL,
            dag               TEXT NOT NULL,
            layer_results     TEXT NOT NULL,
            created_at        TEXT NOT NULL,
            last_activity_at  TEXT NOT NULL,
            expires_at        TEXT NOT NULL,
            latest_checkpoint_layer INTEGER,
            approval_granted_for_layer INTEGER
        );

        CREATE TABLE IF NOT EXISTS thompson_counters (
            tool_id  TEXT PRIMARY KEY,
            alpha    REAL NOT NULL,
            beta     REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hypergraph_nodes (
            id    TEXT PRIMARY KEY,
            kind  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hypergraph_edges (
            id       TEXT PRIMARY KEY,
            weight   REAL NOT NULL,
            metadata TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hypergraph_membership (
            edge_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            side    TEXT NOT NULL CHECK (side IN ('source','target')),
            PRIMARY KEY (edge_id, node_id, side)
        );
        CREATE INDEX IF NOT EXISTS idx_membership_node ON hypergraph_membership(node_id, side);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_creates_tables() {
        let pool = SqlitePool::open_in_memory().unwrap();
        let count: i64 = pool
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert!(count >= 9);
    }
}
