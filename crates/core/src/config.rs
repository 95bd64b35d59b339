use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::StepId;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub review: ReviewConfig,
    pub parallel: ParallelConfig,
    pub snapshot: SnapshotConfig,
}

/// Quality-review behavior: what gets reviewed, how strictly, and what
/// happens when a review fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Master switch; when false no step or final review runs
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Review every step, not just the final one
    #[serde(default)]
    pub review_all_steps: bool,

    /// Run a combined review over all results at the end of the run
    #[serde(default = "default_true")]
    pub review_final_only: bool,

    /// Steps that are always reviewed regardless of the other switches
    #[serde(default)]
    pub critical_steps: BTreeSet<StepId>,

    /// Minimum score for a review to pass
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,

    /// Per-step retry budget (execution and review failures combined)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// When false, revert recommendations degrade to in-place retries
    #[serde(default = "default_true")]
    pub enable_rollback: bool,
}

fn default_true() -> bool {
    true
}

fn default_quality_threshold() -> f64 {
    0.7
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            review_all_steps: false,
            review_final_only: true,
            critical_steps: BTreeSet::new(),
            quality_threshold: default_quality_threshold(),
            max_retries: default_max_retries(),
            enable_rollback: true,
        }
    }
}

impl ReviewConfig {
    /// Review disabled entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            review_final_only: false,
            ..Self::default()
        }
    }

    /// Strict preset: every step reviewed at a high bar with a larger
    /// retry budget.
    pub fn strict() -> Self {
        Self {
            review_all_steps: true,
            review_final_only: false,
            quality_threshold: 0.85,
            max_retries: 5,
            ..Self::default()
        }
    }

    /// Lenient preset: final review only, low bar, no rollback.
    pub fn lenient() -> Self {
        Self {
            quality_threshold: 0.5,
            max_retries: 2,
            enable_rollback: false,
            ..Self::default()
        }
    }
}

/// Wave execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Concurrency cap within a wave; larger waves run in chunks
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    #[serde(default)]
    pub fail_strategy: FailStrategy,
}

fn default_max_parallel() -> usize {
    5
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            fail_strategy: FailStrategy::Continue,
        }
    }
}

/// What a terminal step failure does to its wave siblings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailStrategy {
    /// Sibling failures do not cancel peers
    #[default]
    Continue,
    /// The first terminal failure in a chunk cancels its peers
    Abort,
}

/// Snapshot retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Oldest snapshots are evicted beyond this bound, per trace
    #[serde(default = "default_max_per_trace")]
    pub max_per_trace: usize,
}

fn default_max_per_trace() -> usize {
    50
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_per_trace: default_max_per_trace(),
        }
    }
}
