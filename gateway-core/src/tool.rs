//! Tool identity and the in-process tool registry.
//!
//! Tool identity is a `namespace:action` string at the edge, but every task
//! resolves it once to a `ToolHandle` (design note §9: "dynamic dispatch
//! over tools -> capability tables + tagged variants") so the rest of the
//! system never re-parses the string.

use crate::error::{Error, Result};
use crate::vector::Vector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// A `namespace:action` tool identifier, e.g. `fs:read_json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolId {
    namespace: String,
    action: String,
}

impl ToolId {
    /// Parse a `namespace:action` string.
    pub fn parse(s: &str) -> Result<Self> {
        let (namespace, action) = s
            .split_once(':')
            .ok_or_else(|| Error::invalid_name(s.to_string()))?;
        if namespace.is_empty() || action.is_empty() {
            return Err(Error::invalid_name(s.to_string()));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            action: action.to_string(),
        })
    }

    #[must_use]
    pub fn new(namespace: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            action: action.into(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.action)
    }
}

impl TryFrom<String> for ToolId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ToolId> for String {
    fn from(value: ToolId) -> Self {
        value.to_string()
    }
}

/// Where a capability built from a set of tools should execute.
///
/// A capability is `Cloud` if any tool it uses belongs to a namespace
/// tagged `cloud`; otherwise it is `Local` (spec.md §4.1 `create`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    Local,
    Cloud,
}

/// Running success/failure counters for a tool.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SuccessStats {
    pub successes: u64,
    pub failures: u64,
}

impl SuccessStats {
    pub fn record(&mut self, success: bool) {
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    /// Success rate, treating a never-used tool as perfectly reliable so it
    /// doesn't get starved out of consideration before it has a track record.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            1.0
        } else {
            self.successes as f64 / total as f64
        }
    }
}

/// A registered tool: identity, schemas, embedding, and live statistics.
#[derive(Debug, Clone)]
pub struct Tool {
    pub id: ToolId,
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub output_schema: Option<serde_json::Value>,
    pub embedding: Vector,
    pub success_stats: SuccessStats,
    /// Whether calling this tool has no side effects (eligible for fusion
    /// and for a `failed_safe` rather than hard-error outcome).
    pub pure: bool,
    pub routing: Routing,
    /// Whether this tool needs a permission set beyond the default sandbox
    /// (e.g. write access, network egress) -- plans using it always require
    /// human approval (spec.md §4.6).
    pub elevated: bool,
}

/// A cheap, sharable reference to a registered [`Tool`].
pub type ToolHandle = Arc<Tool>;

/// In-process registry of tools, owned by the graph for the server's
/// lifetime (registration to shutdown, per spec.md §3).
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<ToolId, ToolHandle>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any prior registration under the same id
    /// (tool providers may re-announce their schema across reconnects).
    pub fn register(&self, tool: Tool) -> ToolHandle {
        let handle = Arc::new(tool);
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .insert(handle.id.clone(), handle.clone());
        handle
    }

    #[must_use]
    pub fn get(&self, id: &ToolId) -> Option<ToolHandle> {
        self.tools.read().expect("tool registry lock poisoned").get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &ToolId) -> bool {
        self.tools.read().expect("tool registry lock poisoned").contains_key(id)
    }

    #[must_use]
    pub fn list(&self) -> Vec<ToolHandle> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Record an outcome for `id`'s running success statistics.
    pub fn record_outcome(&self, id: &ToolId, success: bool) {
        let mut tools = self.tools.write().expect("tool registry lock poisoned");
        if let Some(handle) = tools.get_mut(id) {
            let mut tool = (**handle).clone();
            tool.success_stats.record(success);
            *handle = Arc::new(tool);
        }
    }

    /// Routing for a capability that used exactly these tools: `Cloud` if
    /// any is cloud-routed, `Local` otherwise. Unknown tool ids are treated
    /// as `Local` (they cannot have announced a cloud namespace).
    #[must_use]
    pub fn routing_for(&self, ids: &[ToolId]) -> Routing {
        let tools = self.tools.read().expect("tool registry lock poisoned");
        if ids
            .iter()
            .any(|id| matches!(tools.get(id).map(|t| t.routing), Some(Routing::Cloud)))
        {
            Routing::Cloud
        } else {
            Routing::Local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Vector;

    fn test_tool(id: &str, pure: bool, routing: Routing) -> Tool {
        Tool {
            id: ToolId::parse(id).unwrap(),
            name: id.to_string(),
            description: "test tool".to_string(),
            input_schema: serde_json::json!({}),
            output_schema: None,
            embedding: Vector::new(vec![1.0, 0.0]).unwrap(),
            success_stats: SuccessStats::default(),
            pure,
            routing,
            elevated: false,
        }
    }

    #[test]
    fn parses_namespace_and_action() {
        let id = ToolId::parse("fs:read_json").unwrap();
        assert_eq!(id.namespace(), "fs");
        assert_eq!(id.action(), "read_json");
        assert_eq!(id.to_string(), "fs:read_json");
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(ToolId::parse("fsread_json").is_err());
    }

    #[test]
    fn routing_is_cloud_if_any_tool_is_cloud() {
        let registry = ToolRegistry::new();
        registry.register(test_tool("fs:read_json", true, Routing::Local));
        registry.register(test_tool("gh:create_issue", false, Routing::Cloud));

        let ids = vec![
            ToolId::parse("fs:read_json").unwrap(),
            ToolId::parse("gh:create_issue").unwrap(),
        ];
        assert_eq!(registry.routing_for(&ids), Routing::Cloud);
    }

    #[test]
    fn success_rate_defaults_to_one_when_unused() {
        let stats = SuccessStats::default();
        assert_eq!(stats.success_rate(), 1.0);
    }

    #[test]
    fn record_outcome_updates_registered_tool() {
        let registry = ToolRegistry::new();
        let id = ToolId::parse("fs:read_json").unwrap();
        registry.register(test_tool("fs:read_json", true, Routing::Local));
        registry.record_outcome(&id, true);
        registry.record_outcome(&id, false);
        let tool = registry.get(&id).unwrap();
        assert_eq!(tool.success_stats.successes, 1);
        assert_eq!(tool.success_stats.failures, 1);
    }
}
