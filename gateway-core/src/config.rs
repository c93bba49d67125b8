//! Ambient gateway configuration: the operational knobs every component
//! reads from one place, mirroring the teacher's `OrchestratorConfig`
//! (one `Default`-able struct with `serde` support for loading overrides).

use crate::capability::Scope;
use serde::{Deserialize, Serialize};

/// Default upper bound on submitted code size (spec.md §4.8 `code_too_large`).
pub const DEFAULT_MAX_CODE_BYTES: usize = 64 * 1024;

/// `N` in the SHGAT replay sampler's prioritized-experience-replay batch
/// (spec.md §4.4).
pub const DEFAULT_PER_REPLAY_BATCH_SIZE: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Maximum accepted size, in bytes, of a `code` submission.
    pub max_code_bytes: usize,
    /// Worker pool width for the controlled executor.
    pub max_concurrency: usize,
    /// Per-task deadline before the executor emits `task_error{kind=timeout}`.
    pub task_timeout_ms: u64,
    /// TTL, in seconds, applied to an active workflow row on every update.
    pub workflow_ttl_secs: i64,
    /// Batch size for one SHGAT prioritized-experience-replay training pass.
    pub per_replay_batch_size: usize,
    /// Default `(org, project)` scope for requests that don't specify one.
    pub default_scope: Scope,
    /// Whether SHGAT online training runs at all (spec.md §4.4 fallback mode).
    pub training_enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_code_bytes: DEFAULT_MAX_CODE_BYTES,
            max_concurrency: crate::executor::DEFAULT_MAX_CONCURRENCY,
            task_timeout_ms: crate::executor::DEFAULT_TASK_TIMEOUT_MS,
            workflow_ttl_secs: crate::executor::DEFAULT_WORKFLOW_TTL_SECS,
            per_replay_batch_size: DEFAULT_PER_REPLAY_BATCH_SIZE,
            default_scope: Scope::default_scope(),
            training_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_component_constants() {
        let config = GatewayConfig::default();
        assert_eq!(config.max_concurrency, crate::executor::DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.max_code_bytes, DEFAULT_MAX_CODE_BYTES);
    }
}
