use crate::types::StepId;

/// Errors raised by the orchestration core.
///
/// A step with no resolvable worker is not an error kind of its own: it
/// fails at dispatch like any other execution failure and surfaces as
/// `RetryExhausted` once its budget is gone.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed parser output: unrecoverable duplicate ids or a
    /// dependency on a step that does not exist.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("plan contains circular dependencies")]
    CyclicPlan,

    #[error("parser failed: {0}")]
    Parser(String),

    #[error("step {step_id} exhausted its retry budget ({max_retries})")]
    RetryExhausted { step_id: StepId, max_retries: u32 },

    #[error("step {step_id} requires human intervention: {reason}")]
    HumanInterventionRequired { step_id: StepId, reason: String },

    /// The event stream consumer went away; the run stops at the next
    /// suspension point.
    #[error("run cancelled by the consumer")]
    Cancelled,
}

impl EngineError {
    /// Stable kind tag carried on error events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPlan(_) => "invalid_plan",
            Self::CyclicPlan => "cyclic_plan",
            Self::Parser(_) => "parser_failure",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::HumanInterventionRequired { .. } => "human_intervention_required",
            Self::Cancelled => "cancelled",
        }
    }

    /// The step this error is scoped to, if any.
    pub fn step_id(&self) -> Option<StepId> {
        match self {
            Self::RetryExhausted { step_id, .. }
            | Self::HumanInterventionRequired { step_id, .. } => Some(*step_id),
            _ => None,
        }
    }
}
