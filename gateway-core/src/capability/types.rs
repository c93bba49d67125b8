//! Capability, capability record, and scope types.

use crate::error::{Error, Result};
use crate::ids::CapabilityId;
use crate::tool::{Routing, ToolId};
use crate::vector::Vector;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static DISPLAY_NAME_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*(:[A-Za-z][A-Za-z0-9_-]*)?$").unwrap()
});
static FQDN_COMPONENT_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-z0-9_]+$").unwrap());
static SHORT_HASH_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[0-9a-f]{4}$").unwrap());

/// Validate a display name (`namespace:action` or a bare identifier) against
/// the identifier grammar in spec.md §4.1.
pub fn validate_display_name(name: &str) -> Result<()> {
    if DISPLAY_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::invalid_name(name.to_string()))
    }
}

/// Validate a single FQDN component (`org`, `project`, `namespace`, `action`).
pub fn validate_fqdn_component(component: &str) -> Result<()> {
    if FQDN_COMPONENT_RE.is_match(component) {
        Ok(())
    } else {
        Err(Error::invalid_name(component.to_string()))
    }
}

/// Validate a 4-character lowercase hex short hash.
pub fn validate_short_hash(short_hash: &str) -> Result<()> {
    if SHORT_HASH_RE.is_match(short_hash) {
        Ok(())
    } else {
        Err(Error::invalid_name(short_hash.to_string()))
    }
}

/// Build the immutable `fqdn` from its components: `org.project.namespace.action.shortHash`.
#[must_use]
pub fn build_fqdn(org: &str, project: &str, namespace: &str, action: &str, short_hash: &str) -> String {
    format!("{org}.{project}.{namespace}.{action}.{short_hash}")
}

/// A scope within which display names and code hashes are unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub org: String,
    pub project: String,
}

impl Scope {
    #[must_use]
    pub fn new(org: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            project: project.into(),
        }
    }

    /// The default scope used when a caller doesn't specify one.
    #[must_use]
    pub fn default_scope() -> Self {
        Self::new("local", "default")
    }
}

/// Visibility of a registered capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Project,
    Org,
    Public,
}

/// An executed code snippet that successfully produced a result.
///
/// Stored as a `workflow_patterns` row; [`CapabilityRecord`] is the registry
/// row pointing at it by `workflowPatternId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub id: CapabilityId,
    pub code_hash: String,
    pub code_snippet: String,
    pub intent: String,
    pub tools_used: Vec<ToolId>,
    pub success_count: u64,
    pub usage_count: u64,
    pub total_latency_ms: u64,
    pub parameters_schema: Option<serde_json::Value>,
    pub children: Vec<CapabilityId>,
    pub hierarchy_level: u32,
    pub embedding: Vector,
}

impl Capability {
    /// `successCount / max(usageCount, 1)`.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        self.success_count as f64 / self.usage_count.max(1) as f64
    }

    pub fn record_usage(&mut self, success: bool, latency_ms: u64) {
        self.usage_count += 1;
        if success {
            self.success_count += 1;
        }
        self.total_latency_ms += latency_ms;
    }
}

/// A registry row: the immutable, human-resolvable identity of a capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub id: CapabilityId,
    pub fqdn: String,
    pub org: String,
    pub project: String,
    pub namespace: String,
    pub action: String,
    pub short_hash: String,
    pub code_hash: String,
    pub workflow_pattern_id: CapabilityId,
    pub created_by: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub version: u32,
    pub verified: bool,
    pub visibility: Visibility,
    pub routing: Routing,
    pub tags: Vec<String>,
    pub usage_count: u64,
    pub success_count: u64,
    pub total_latency_ms: u64,
}

impl CapabilityRecord {
    /// Current `namespace:action` display name.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}:{}", self.namespace, self.action)
    }

    #[must_use]
    pub fn success_rate(&self) -> f64 {
        self.success_count as f64 / self.usage_count.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_accepts_namespace_colon_action() {
        assert!(validate_display_name("fs:read_json").is_ok());
        assert!(validate_display_name("read_json").is_ok());
    }

    #[test]
    fn display_name_rejects_leading_digit() {
        assert!(validate_display_name("1fs:read_json").is_err());
    }

    #[test]
    fn fqdn_component_rejects_uppercase() {
        assert!(validate_fqdn_component("Fs").is_err());
        assert!(validate_fqdn_component("fs").is_ok());
    }

    #[test]
    fn short_hash_requires_exactly_four_lowercase_hex_chars() {
        assert!(validate_short_hash("ab12").is_ok());
        assert!(validate_short_hash("AB12").is_err());
        assert!(validate_short_hash("ab1").is_err());
    }

    #[test]
    fn builds_fqdn_from_components() {
        assert_eq!(
            build_fqdn("local", "default", "fs", "exec_abcd1234", "ab12"),
            "local.default.fs.exec_abcd1234.ab12"
        );
    }
}
