//! Contracts the engine consumes from its collaborators. The engine never
//! talks to the network itself; parsers, matchers and executors are
//! injected behind these traits.

use crate::error::EngineError;
use crate::types::{ExecutionPlan, RunContext, TaskStep, TraceId};
use async_trait::async_trait;

/// Decomposes a natural-language goal into an execution plan.
///
/// The returned plan is raw parser output: the engine renumbers duplicate
/// ids, initializes the DAG and validates it before anything runs.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn parse(&self, goal: &str) -> Result<ExecutionPlan, EngineError>;
}

/// Resolves plan steps to workers, setting `assigned_agent` on each step it
/// can match. Steps it cannot resolve are left unassigned and fail at
/// dispatch time.
#[async_trait]
pub trait AgentMatcher: Send + Sync {
    async fn assign(&self, plan: &mut ExecutionPlan) -> Result<(), EngineError>;
}

/// Outcome of one executor invocation for a step.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// The step with its runtime fields (status, result, error,
    /// timestamps) updated
    pub step: TaskStep,
    /// Textual worker output; empty when the step failed
    pub result: String,
    /// Failed transport attempts consumed by this invocation. At least 1
    /// whenever the step comes back failed; charged against the step's
    /// retry budget.
    pub failed_attempts: u32,
}

/// Invokes the remote worker bound to a step.
///
/// Infallible at the type level: transport problems, missing workers and
/// bad responses are all encoded in the returned step's status and error,
/// so the scheduler has a single failure path.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: TaskStep,
        context: &RunContext,
        trace_id: TraceId,
    ) -> ExecOutcome;
}
