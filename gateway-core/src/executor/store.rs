//! Checkpoint and active-workflow persistence, sharing the registry/trace
//! stores' `SqlitePool` + hand-mapped-row idiom.

use super::types::{ActiveWorkflow, Checkpoint, SerializedState, WorkflowStatus};
use crate::error::Result;
use crate::plan::PhysicalDag;
use crate::store::SqlitePool;
use rusqlite::{params, OptionalExtension};

pub const DEFAULT_WORKFLOW_TTL_SECS: i64 = 3600;

#[derive(Clone)]
pub struct WorkflowStore {
    pool: SqlitePool,
}

impl WorkflowStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn save_checkpoint(&self, workflow_id: &str, layer: u32, state: &SerializedState) -> Result<()> {
        let serialized = serde_json::to_string(state)?;
        let now = chrono::Utc::now().to_rfc3339();
        self.pool.with_conn(|conn| {
            conn.execute(
                "INSERT INTO checkpoints (workflow_id, layer, serialized_state, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(workflow_id, layer) DO UPDATE SET serialized_state = excluded.serialized_state",
                params![workflow_id, layer, serialized, now],
            )?;
            Ok(())
        })
    }

    pub fn latest_checkpoint(&self, workflow_id: &str) -> Result<Option<Checkpoint>> {
        self.pool.with_conn(|conn| {
            conn.query_row(
                "SELECT workflow_id, layer, serialized_state, created_at FROM checkpoints
                 WHERE workflow_id = ?1 ORDER BY layer DESC LIMIT 1",
                params![workflow_id],
                |row| {
                    let serialized: String = row.get(2)?;
                    Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?, serialized, row.get::<_, String>(3)?))
                },
            )
            .optional()?
            .map(|(workflow_id, layer, serialized, created_at)| {
                Ok(Checkpoint {
                    workflow_id,
                    layer,
                    serialized_state: serde_json::from_str(&serialized)?,
                    created_at,
                })
            })
            .transpose()
        })
    }

    pub fn checkpoint(&self, workflow_id: &str, layer: u32) -> Result<Option<Checkpoint>> {
        self.pool.with_conn(|conn| {
            conn.query_row(
                "SELECT serialized_state, created_at FROM checkpoints
                 WHERE workflow_id = ?1 AND layer = ?2",
                params![workflow_id, layer],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
            .map(|(serialized, created_at)| {
                Ok(Checkpoint {
                    workflow_id: workflow_id.to_string(),
                    layer,
                    serialized_state: serde_json::from_str(&serialized)?,
                    created_at,
                })
            })
            .transpose()
        })
    }

    pub fn upsert_active_workflow(&self, workflow: &ActiveWorkflow) -> Result<()> {
        let dag = serde_json::to_string(&workflow.dag)?;
        let layer_results = serde_json::to_string(&workflow.layer_results)?;
        self.pool.with_conn(|conn| {
            conn.execute(
                "INSERT INTO active_workflows
                    (workflow_id, status, current_layer, total_layers, dag, layer_results,
                     created_at, last_activity_at, expires_at, latest_checkpoint_layer,
                     approval_granted_for_layer)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(workflow_id) DO UPDATE SET
                    status = excluded.status,
                    current_layer = excluded.current_layer,
                    total_layers = excluded.total_layers,
                    dag = excluded.dag,
                    layer_results = excluded.layer_results,
                    last_activity_at = excluded.last_activity_at,
                    expires_at = excluded.expires_at,
                    latest_checkpoint_layer = excluded.latest_checkpoint_layer,
                    approval_granted_for_layer = excluded.approval_granted_for_layer",
                params![
                    workflow.workflow_id,
                    workflow.status.as_str(),
                    workflow.current_layer,
                    workflow.total_layers,
                    dag,
                    layer_results,
                    workflow.created_at,
                    workflow.last_activity_at,
                    workflow.expires_at,
                    workflow.latest_checkpoint_layer,
                    workflow.approval_granted_for_layer,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_active_workflow(&self, workflow_id: &str) -> Result<Option<ActiveWorkflow>> {
        self.pool.with_conn(|conn| {
            conn.query_row(
                "SELECT workflow_id, status, current_layer, total_layers, dag, layer_results,
                        created_at, last_activity_at, expires_at, latest_checkpoint_layer,
                        approval_granted_for_layer
                 FROM active_workflows WHERE workflow_id = ?1",
                params![workflow_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, Option<u32>>(9)?,
                        row.get::<_, Option<u32>>(10)?,
                    ))
                },
            )
            .optional()?
            .map(
                |(
                    workflow_id,
                    status,
                    current_layer,
                    total_layers,
                    dag,
                    layer_results,
                    created_at,
                    last_activity_at,
                    expires_at,
                    latest_checkpoint_layer,
                    approval_granted_for_layer,
                )| {
                    Ok(ActiveWorkflow {
                        workflow_id,
                        status: WorkflowStatus::parse(&status)?,
                        current_layer,
                        total_layers,
                        dag: serde_json::from_str::<PhysicalDag>(&dag)?,
                        layer_results: serde_json::from_str(&layer_results)?,
                        created_at,
                        last_activity_at,
                        expires_at,
                        latest_checkpoint_layer,
                        approval_granted_for_layer,
                    })
                },
            )
            .transpose()
        })
    }
}
