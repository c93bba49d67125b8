//! Capability Registry (C2): immutable identifiers, dedup by code hash,
//! named lookup, and usage accounting.
//!
//! Grounded in the teacher's `memory::store::SqliteMemoryStore`: one shared
//! [`SqlitePool`], rows mapped by hand (no ORM), writes serialized by the
//! connection mutex which gives us the per-`(scope, codeHash)` write
//! serialization spec.md §5 asks for without a separate lock table.

use super::types::{
    build_fqdn, validate_display_name, validate_fqdn_component, validate_short_hash, Capability,
    CapabilityRecord, Scope, Visibility,
};
use crate::error::{Error, Result};
use crate::ids::CapabilityId;
use crate::store::SqlitePool;
use crate::tool::{Routing, ToolId};
use crate::vector::Vector;
use rusqlite::{params, OptionalExtension, Row};

/// Stores the underlying workflow pattern (code, embedding, tools used) that
/// a [`CapabilityRecord`] points at via `workflow_pattern_id`.
#[derive(Clone)]
pub struct CapabilityStore {
    pool: SqlitePool,
}

impl CapabilityStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn create(&self, capability: &Capability) -> Result<()> {
        let tools_used = serde_json::to_string(&capability.tools_used)?;
        let children = serde_json::to_string(&capability.children)?;
        let embedding = serde_json::to_string(capability.embedding.as_slice())?;
        let parameters_schema = capability
            .parameters_schema
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.pool.with_conn(|conn| {
            conn.execute(
                "INSERT INTO workflow_patterns
                    (id, code_hash, code_snippet, intent, tools_used, parameters_schema,
                     description, intent_embedding, success_count, usage_count,
                     total_latency_ms, hierarchy_level, children)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    capability.id.to_string(),
                    capability.code_hash,
                    capability.code_snippet,
                    capability.intent,
                    tools_used,
                    parameters_schema,
                    embedding,
                    capability.success_count,
                    capability.usage_count,
                    capability.total_latency_ms,
                    capability.hierarchy_level,
                    children,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, id: CapabilityId) -> Result<Option<Capability>> {
        self.pool.with_conn(|conn| {
            conn.query_row(
                "SELECT id, code_hash, code_snippet, intent, tools_used, parameters_schema,
                        intent_embedding, success_count, usage_count, total_latency_ms,
                        hierarchy_level, children
                 FROM workflow_patterns WHERE id = ?1",
                params![id.to_string()],
                row_to_capability,
            )
            .optional()
            .map_err(Error::from)
        })
    }

    pub fn get_by_code_hash(&self, code_hash: &str) -> Result<Option<Capability>> {
        self.pool.with_conn(|conn| {
            conn.query_row(
                "SELECT id, code_hash, code_snippet, intent, tools_used, parameters_schema,
                        intent_embedding, success_count, usage_count, total_latency_ms,
                        hierarchy_level, children
                 FROM workflow_patterns WHERE code_hash = ?1",
                params![code_hash],
                row_to_capability,
            )
            .optional()
            .map_err(Error::from)
        })
    }

    /// Atomic increment of `usageCount`, conditional increment of
    /// `successCount`, accumulation of `totalLatencyMs`.
    pub fn record_usage(&self, id: CapabilityId, success: bool, latency_ms: u64) -> Result<()> {
        self.pool.with_conn(|conn| {
            conn.execute(
                "UPDATE workflow_patterns
                 SET usage_count = usage_count + 1,
                     success_count = success_count + ?2,
                     total_latency_ms = total_latency_ms + ?3
                 WHERE id = ?1",
                params![id.to_string(), i64::from(success), latency_ms],
            )?;
            Ok(())
        })
    }
}

fn row_to_capability(row: &Row<'_>) -> rusqlite::Result<Capability> {
    let id: String = row.get(0)?;
    let tools_used: String = row.get(4)?;
    let parameters_schema: Option<String> = row.get(5)?;
    let embedding: String = row.get(6)?;
    let children: String = row.get(11)?;
    Ok(Capability {
        id: CapabilityId::parse(&id).map_err(to_sqlite_err)?,
        code_hash: row.get(1)?,
        code_snippet: row.get(2)?,
        intent: row.get(3)?,
        tools_used: serde_json::from_str::<Vec<ToolId>>(&tools_used).map_err(to_sqlite_err)?,
        success_count: row.get(7)?,
        usage_count: row.get(8)?,
        total_latency_ms: row.get(9)?,
        parameters_schema: parameters_schema
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(to_sqlite_err)?,
        children: serde_json::from_str::<Vec<CapabilityId>>(&children).map_err(to_sqlite_err)?,
        hierarchy_level: row.get(10)?,
        embedding: Vector::new(serde_json::from_str(&embedding).map_err(to_sqlite_err)?)
            .map_err(to_sqlite_err)?,
    })
}

fn to_sqlite_err(err: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(0, err.to_string(), rusqlite::types::Type::Text)
}

/// Arguments to [`CapabilityRegistry::create`].
pub struct CreateArgs {
    pub scope: Scope,
    pub namespace: String,
    pub action: String,
    pub workflow_pattern_id: CapabilityId,
    pub code_hash: String,
    pub short_hash: String,
    pub tools_used: Vec<ToolId>,
    pub created_by: String,
}

#[derive(Clone)]
pub struct CapabilityRegistry {
    pool: SqlitePool,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Assign and persist a new registry row. Fails with [`Error::collision`]
    /// if `(scope, displayName)` already exists.
    pub fn create(&self, args: CreateArgs, routing: Routing) -> Result<CapabilityRecord> {
        validate_fqdn_component(&args.namespace)?;
        validate_fqdn_component(&args.action)?;
        validate_short_hash(&args.short_hash)?;

        let display_name = format!("{}:{}", args.namespace, args.action);
        if self.resolve_by_name(&display_name, &args.scope)?.is_some() {
            return Err(Error::collision(format!(
                "capability {display_name} already exists in scope {}/{}",
                args.scope.org, args.scope.project
            )));
        }

        let fqdn = build_fqdn(
            &args.scope.org,
            &args.scope.project,
            &args.namespace,
            &args.action,
            &args.short_hash,
        );
        let id = CapabilityId::new();
        let now = chrono::Utc::now();
        let tags: Vec<String> = Vec::new();

        self.pool.with_conn(|conn| {
            conn.execute(
                "INSERT INTO capability_records
                    (id, org, project, namespace, action, short_hash, fqdn, code_hash,
                     workflow_pattern_id, created_by, created_at, updated_at, version,
                     verified, visibility, routing, tags, usage_count, success_count,
                     total_latency_ms)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,1,0,?13,?14,?15,0,0,0)",
                params![
                    id.to_string(),
                    args.scope.org,
                    args.scope.project,
                    args.namespace,
                    args.action,
                    args.short_hash,
                    fqdn,
                    args.code_hash,
                    args.workflow_pattern_id.to_string(),
                    args.created_by,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    visibility_to_str(Visibility::Private),
                    routing_to_str(routing),
                    serde_json::to_string(&tags)?,
                ],
            )?;
            Ok(())
        })?;

        self.get_by_id(id)?
            .ok_or_else(|| Error::Internal("capability record vanished after insert".into()))
    }

    pub fn get_by_code_hash(&self, code_hash: &str, scope: &Scope) -> Result<Option<CapabilityRecord>> {
        self.query_one(
            "SELECT * FROM capability_records WHERE code_hash = ?1 AND org = ?2 AND project = ?3",
            params![code_hash, scope.org, scope.project],
        )
    }

    /// Accepts `namespace:action` or a full FQDN. Single-resolution; no alias chain.
    pub fn resolve_by_name(&self, name: &str, scope: &Scope) -> Result<Option<CapabilityRecord>> {
        if name.contains('.') {
            return self.query_one(
                "SELECT * FROM capability_records WHERE fqdn = ?1 AND org = ?2 AND project = ?3",
                params![name, scope.org, scope.project],
            );
        }
        let (namespace, action) = name
            .split_once(':')
            .ok_or_else(|| Error::invalid_name(name.to_string()))?;
        self.query_one(
            "SELECT * FROM capability_records
             WHERE namespace = ?1 AND action = ?2 AND org = ?3 AND project = ?4",
            params![namespace, action, scope.org, scope.project],
        )
    }

    pub fn get_by_id(&self, id: CapabilityId) -> Result<Option<CapabilityRecord>> {
        self.query_one(
            "SELECT * FROM capability_records WHERE id = ?1",
            params![id.to_string()],
        )
    }

    pub fn get_by_fqdn_components(
        &self,
        org: &str,
        project: &str,
        namespace: &str,
        action: &str,
        short_hash: &str,
    ) -> Result<Option<CapabilityRecord>> {
        let fqdn = build_fqdn(org, project, namespace, action, short_hash);
        self.query_one(
            "SELECT * FROM capability_records WHERE fqdn = ?1",
            params![fqdn],
        )
    }

    /// Updates display fields; `fqdn` never changes. Fails with *collision*
    /// if `newName` exists in scope, *invalid-name* if it fails the grammar.
    pub fn rename(
        &self,
        current_name: &str,
        new_name: &str,
        scope: &Scope,
    ) -> Result<CapabilityRecord> {
        validate_display_name(new_name)?;
        let existing = self
            .resolve_by_name(current_name, scope)?
            .ok_or_else(|| Error::not_found(format!("capability {current_name} not found")))?;

        if let Some(conflict) = self.resolve_by_name(new_name, scope)? {
            if conflict.id != existing.id {
                return Err(Error::collision(format!(
                    "capability {new_name} already exists in scope {}/{}",
                    scope.org, scope.project
                )));
            }
        }

        let (namespace, action) = new_name
            .split_once(':')
            .unwrap_or((new_name, existing.action.as_str()));
        let now = chrono::Utc::now().to_rfc3339();

        self.pool.with_conn(|conn| {
            conn.execute(
                "UPDATE capability_records
                 SET namespace = ?2, action = ?3, updated_at = ?4, version = version + 1
                 WHERE id = ?1",
                params![existing.id.to_string(), namespace, action, now],
            )?;
            Ok(())
        })?;

        self.get_by_id(existing.id)?
            .ok_or_else(|| Error::Internal("capability record vanished after rename".into()))
    }

    /// Atomic increment of `usageCount`, conditional increment of
    /// `successCount`, accumulation of `totalLatencyMs`.
    pub fn record_usage(&self, id: CapabilityId, success: bool, latency_ms: u64) -> Result<()> {
        self.pool.with_conn(|conn| {
            conn.execute(
                "UPDATE capability_records
                 SET usage_count = usage_count + 1,
                     success_count = success_count + ?2,
                     total_latency_ms = total_latency_ms + ?3
                 WHERE id = ?1",
                params![id.to_string(), i64::from(success), latency_ms],
            )?;
            Ok(())
        })
    }

    fn query_one(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<CapabilityRecord>> {
        self.pool.with_conn(|conn| {
            conn.query_row(sql, params, row_to_record)
                .optional()
                .map_err(Error::from)
        })
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CapabilityRecord> {
    let id: String = row.get("id")?;
    let workflow_pattern_id: String = row.get("workflow_pattern_id")?;
    let tags: String = row.get("tags")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let visibility: String = row.get("visibility")?;
    let routing: String = row.get("routing")?;
    Ok(CapabilityRecord {
        id: CapabilityId::parse(&id).map_err(to_sqlite_err)?,
        fqdn: row.get("fqdn")?,
        org: row.get("org")?,
        project: row.get("project")?,
        namespace: row.get("namespace")?,
        action: row.get("action")?,
        short_hash: row.get("short_hash")?,
        code_hash: row.get("code_hash")?,
        workflow_pattern_id: CapabilityId::parse(&workflow_pattern_id).map_err(to_sqlite_err)?,
        created_by: row.get("created_by")?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map_err(to_sqlite_err)?
            .with_timezone(&chrono::Utc),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map_err(to_sqlite_err)?
            .with_timezone(&chrono::Utc),
        version: row.get("version")?,
        verified: row.get::<_, i64>("verified")? != 0,
        visibility: str_to_visibility(&visibility).map_err(to_sqlite_err)?,
        routing: str_to_routing(&routing).map_err(to_sqlite_err)?,
        tags: serde_json::from_str(&tags).map_err(to_sqlite_err)?,
        usage_count: row.get("usage_count")?,
        success_count: row.get("success_count")?,
        total_latency_ms: row.get("total_latency_ms")?,
    })
}

fn visibility_to_str(v: Visibility) -> &'static str {
    match v {
        Visibility::Private => "private",
        Visibility::Project => "project",
        Visibility::Org => "org",
        Visibility::Public => "public",
    }
}

fn str_to_visibility(s: &str) -> Result<Visibility> {
    match s {
        "private" => Ok(Visibility::Private),
        "project" => Ok(Visibility::Project),
        "org" => Ok(Visibility::Org),
        "public" => Ok(Visibility::Public),
        other => Err(Error::Internal(format!("unknown visibility {other}"))),
    }
}

fn routing_to_str(r: Routing) -> &'static str {
    match r {
        Routing::Local => "local",
        Routing::Cloud => "cloud",
    }
}

fn str_to_routing(s: &str) -> Result<Routing> {
    match s {
        "local" => Ok(Routing::Local),
        "cloud" => Ok(Routing::Cloud),
        other => Err(Error::Internal(format!("unknown routing {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new(SqlitePool::open_in_memory().unwrap())
    }

    fn create_args(action: &str) -> CreateArgs {
        CreateArgs {
            scope: Scope::default_scope(),
            namespace: "fs".to_string(),
            action: action.to_string(),
            workflow_pattern_id: CapabilityId::new(),
            code_hash: format!("hash-{action}"),
            short_hash: "ab12".to_string(),
            tools_used: vec![ToolId::parse("fs:read_file").unwrap()],
            created_by: "test".to_string(),
        }
    }

    #[test]
    fn create_assigns_immutable_fqdn() {
        let registry = registry();
        let record = registry.create(create_args("exec_abcd1234"), Routing::Local).unwrap();
        assert_eq!(record.fqdn, "local.default.fs.exec_abcd1234.ab12");
    }

    #[test]
    fn create_rejects_duplicate_display_name_in_scope() {
        let registry = registry();
        registry.create(create_args("exec_abcd1234"), Routing::Local).unwrap();
        let mut dup = create_args("exec_abcd1234");
        dup.code_hash = "different-hash".to_string();
        let err = registry.create(dup, Routing::Local).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Collision);
    }

    #[test]
    fn rename_preserves_fqdn() {
        let registry = registry();
        let record = registry.create(create_args("exec_abcd1234"), Routing::Local).unwrap();
        let renamed = registry
            .rename("fs:exec_abcd1234", "fs:renamed", &Scope::default_scope())
            .unwrap();
        assert_eq!(renamed.fqdn, record.fqdn);
        assert_eq!(renamed.action, "renamed");
        assert_eq!(renamed.version, 2);
    }

    #[test]
    fn rename_round_trip_is_equivalent_modulo_version() {
        let registry = registry();
        registry.create(create_args("exec_abcd1234"), Routing::Local).unwrap();
        let scope = Scope::default_scope();
        registry.rename("fs:exec_abcd1234", "fs:temp", &scope).unwrap();
        let back = registry.rename("fs:temp", "fs:exec_abcd1234", &scope).unwrap();
        assert_eq!(back.namespace, "fs");
        assert_eq!(back.action, "exec_abcd1234");
        assert_eq!(back.version, 3);
    }

    #[test]
    fn record_usage_accumulates_counters() {
        let registry = registry();
        let record = registry.create(create_args("exec_abcd1234"), Routing::Local).unwrap();
        registry.record_usage(record.id, true, 120).unwrap();
        registry.record_usage(record.id, false, 80).unwrap();
        let updated = registry.get_by_id(record.id).unwrap().unwrap();
        assert_eq!(updated.usage_count, 2);
        assert_eq!(updated.success_count, 1);
        assert_eq!(updated.total_latency_ms, 200);
    }

    #[test]
    fn get_by_code_hash_finds_dedup_target() {
        let registry = registry();
        let args = create_args("exec_abcd1234");
        let code_hash = args.code_hash.clone();
        let record = registry.create(args, Routing::Local).unwrap();
        let found = registry
            .get_by_code_hash(&code_hash, &Scope::default_scope())
            .unwrap()
            .unwrap();
        assert_eq!(found.id, record.id);
    }
}
