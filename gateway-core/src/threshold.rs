//! Thompson Threshold Manager (C7): per-tool Beta(alpha, beta) posteriors
//! driving stochastic approval thresholds.
//!
//! Grounded on the registry/trace stores' `SqlitePool` + hand-mapped-row
//! idiom; `rand_distr::Beta` is the teacher's `rand`/`rand_distr` pairing
//! (already used for PER sampling in `trace::store`), applied here to
//! Thompson sampling instead.

use crate::error::{Error, Result};
use crate::store::SqlitePool;
use crate::tool::ToolId;
use rand::Rng;
use rand_distr::{Beta, Distribution};
use rusqlite::{params, OptionalExtension};

/// Used for a tool with no recorded outcomes yet (spec.md §4.5).
pub const DEFAULT_SUGGESTION_THRESHOLD: f64 = 0.7;

#[derive(Clone)]
pub struct ThresholdManager {
    pool: SqlitePool,
}

impl ThresholdManager {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record one outcome: success increments `alpha`, failure increments
    /// `beta`. Initializes the posterior to `(1, 1)` on first use, so
    /// `alpha >= 1` and `beta >= 1` always hold.
    pub fn record_outcome(&self, tool_id: &ToolId, success: bool) -> Result<()> {
        let id = tool_id.to_string();
        self.pool.with_conn(|conn| {
            conn.execute(
                "INSERT INTO thompson_counters (tool_id, alpha, beta) VALUES (?1, 1.0, 1.0)
                 ON CONFLICT(tool_id) DO NOTHING",
                params![id],
            )?;
            if success {
                conn.execute(
                    "UPDATE thompson_counters SET alpha = alpha + 1.0 WHERE tool_id = ?1",
                    params![id],
                )?;
            } else {
                conn.execute(
                    "UPDATE thompson_counters SET beta = beta + 1.0 WHERE tool_id = ?1",
                    params![id],
                )?;
            }
            Ok(())
        })
    }

    fn posterior(&self, tool_id: &ToolId) -> Result<Option<(f64, f64)>> {
        self.pool.with_conn(|conn| {
            conn.query_row(
                "SELECT alpha, beta FROM thompson_counters WHERE tool_id = ?1",
                params![tool_id.to_string()],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?)),
            )
            .optional()
            .map_err(Error::from)
        })
    }

    /// `1 - sample(Beta(alpha, beta))`, clamped to `[0, 1]`. Falls back to
    /// [`DEFAULT_SUGGESTION_THRESHOLD`] when `tool_id` has no posterior yet.
    /// Reproducible given the same `rng` state.
    pub fn approval_threshold(&self, tool_id: &ToolId, rng: &mut impl Rng) -> Result<f64> {
        let Some((alpha, beta)) = self.posterior(tool_id)? else {
            return Ok(DEFAULT_SUGGESTION_THRESHOLD);
        };
        let dist = Beta::new(alpha, beta).map_err(|e| {
            Error::Internal(format!("invalid beta posterior ({alpha}, {beta}): {e}"))
        })?;
        Ok((1.0 - dist.sample(rng)).clamp(0.0, 1.0))
    }

    /// The global suggestion threshold used when no per-tool posterior
    /// applies (e.g. scoring a capability rather than a single tool).
    #[must_use]
    pub fn suggestion_threshold(&self) -> f64 {
        DEFAULT_SUGGESTION_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn approval_threshold_without_data_returns_default() {
        let manager = ThresholdManager::new(SqlitePool::open_in_memory().unwrap());
        let tool = ToolId::parse("fs:read_file").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            manager.approval_threshold(&tool, &mut rng).unwrap(),
            DEFAULT_SUGGESTION_THRESHOLD
        );
    }

    #[test]
    fn record_outcome_initializes_and_accumulates() {
        let manager = ThresholdManager::new(SqlitePool::open_in_memory().unwrap());
        let tool = ToolId::parse("fs:read_file").unwrap();
        manager.record_outcome(&tool, true).unwrap();
        manager.record_outcome(&tool, true).unwrap();
        manager.record_outcome(&tool, false).unwrap();
        let (alpha, beta) = manager.posterior(&tool).unwrap().unwrap();
        assert_eq!(alpha, 3.0);
        assert_eq!(beta, 2.0);
    }

    #[test]
    fn approval_threshold_is_reproducible_with_same_seed() {
        let manager = ThresholdManager::new(SqlitePool::open_in_memory().unwrap());
        let tool = ToolId::parse("fs:read_file").unwrap();
        for _ in 0..5 {
            manager.record_outcome(&tool, false).unwrap();
        }
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = manager.approval_threshold(&tool, &mut rng_a).unwrap();
        let b = manager.approval_threshold(&tool, &mut rng_b).unwrap();
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a));
    }

    #[test]
    fn approval_threshold_trends_high_after_many_failures() {
        let manager = ThresholdManager::new(SqlitePool::open_in_memory().unwrap());
        let tool = ToolId::parse("fs:read_file").unwrap();
        for _ in 0..50 {
            manager.record_outcome(&tool, false).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(7);
        // alpha=1, beta=51: the posterior concentrates near 0, so
        // 1 - sample should concentrate near 1.
        let threshold = manager.approval_threshold(&tool, &mut rng).unwrap();
        assert!(threshold > 0.5);
    }
}
