use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::EngineError;

/// Unique identifier for one end-to-end execution of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub Uuid);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex chars, used in filenames and log lines
    pub fn short(&self) -> String {
        self.0.to_string().chars().take(8).collect()
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a step within a plan (positive, unique per plan)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StepId(pub u32);

impl StepId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a plan step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Terminal statuses never transition again within a run (short of a
    /// snapshot restore).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

/// Descriptor of a remote agent as returned by the registry.
///
/// The core only relies on `name` and `url`; any additional capability
/// metadata rides along in `extra` untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AgentCard {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
            description: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// A single unit of work within a plan.
///
/// The first five fields come from the parser; the rest are runtime state
/// owned by the scheduler and never written by collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub step_id: StepId,
    pub name: String,
    /// Prompt fragment used both for agent discovery and as the task body
    pub description: String,
    #[serde(default)]
    pub context_keys: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<StepId>,

    /// Unsatisfied-dependency count, maintained by the scheduler
    #[serde(default)]
    pub in_degree: u32,
    /// Reverse edges, derived during DAG initialization
    #[serde(default)]
    pub successors: Vec<StepId>,
    #[serde(default)]
    pub assigned_agent: Option<AgentCard>,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskStep {
    pub fn new(step_id: u32, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step_id: StepId(step_id),
            name: name.into(),
            description: description.into(),
            context_keys: Vec::new(),
            dependencies: Vec::new(),
            in_degree: 0,
            successors: Vec::new(),
            assigned_agent: None,
            status: StepStatus::Pending,
            result: None,
            error: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = u32>) -> Self {
        self.dependencies = dependencies.into_iter().map(StepId).collect();
        self
    }

    pub fn with_context_keys(
        mut self,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.context_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// The DAG of steps produced by the parser from a user goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub goal: String,
    #[serde(default)]
    pub trace_id: TraceId,
    pub steps: Vec<TaskStep>,
    // Derived index: step id -> position in `steps`. Rebuilt by init_dag,
    // never serialized, so the plan owns its steps without back-pointers.
    #[serde(skip)]
    index: HashMap<StepId, usize>,
}

impl ExecutionPlan {
    pub fn new(goal: impl Into<String>, steps: Vec<TaskStep>) -> Self {
        Self {
            goal: goal.into(),
            trace_id: TraceId::new(),
            steps,
            index: HashMap::new(),
        }
    }

    /// Renumber steps `1..N` in order if the parser emitted duplicate or
    /// non-positive ids. Returns true when a renumbering happened.
    ///
    /// Dependencies are left as emitted; a dependency orphaned by the
    /// renumbering is rejected later as an invalid plan.
    pub fn renumber_duplicate_ids(&mut self) -> bool {
        let mut seen = std::collections::HashSet::new();
        let needs_renumber = self
            .steps
            .iter()
            .any(|s| s.step_id.0 == 0 || !seen.insert(s.step_id));
        if needs_renumber {
            for (position, step) in self.steps.iter_mut().enumerate() {
                step.step_id = StepId(position as u32 + 1);
            }
        }
        needs_renumber
    }

    /// Build the derived index and initialize in-degrees and successor
    /// lists. Call after the step list is final (post renumbering).
    pub fn init_dag(&mut self) -> Result<(), EngineError> {
        self.index.clear();
        for (position, step) in self.steps.iter().enumerate() {
            if self.index.insert(step.step_id, position).is_some() {
                return Err(EngineError::InvalidPlan(format!(
                    "duplicate step id {}",
                    step.step_id
                )));
            }
        }

        let edges: Vec<(StepId, StepId)> = self
            .steps
            .iter()
            .flat_map(|s| s.dependencies.iter().map(|d| (*d, s.step_id)))
            .collect();

        for step in &mut self.steps {
            step.in_degree = step.dependencies.len() as u32;
            step.successors.clear();
        }
        for (dependency, dependent) in edges {
            if let Some(position) = self.index.get(&dependency) {
                self.steps[*position].successors.push(dependent);
            }
        }
        Ok(())
    }

    pub fn contains(&self, id: StepId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn step(&self, id: StepId) -> Option<&TaskStep> {
        self.index.get(&id).map(|position| &self.steps[*position])
    }

    pub fn step_mut(&mut self, id: StepId) -> Option<&mut TaskStep> {
        let position = *self.index.get(&id)?;
        Some(&mut self.steps[position])
    }

    /// Steps that are schedulable right now: pending with no unsatisfied
    /// dependencies.
    pub fn ready_steps(&self) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|s| s.in_degree == 0 && s.status == StepStatus::Pending)
            .map(|s| s.step_id)
            .collect()
    }

    pub fn successful_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Success)
            .count()
    }

    /// True when every step other than `id` has reached a terminal status,
    /// i.e. `id` is the last step still in flight.
    pub fn is_last_open_step(&self, id: StepId) -> bool {
        self.steps
            .iter()
            .filter(|s| s.step_id != id)
            .all(|s| s.status.is_terminal())
    }
}

/// Context key under which reviewer suggestions are surfaced to the next
/// attempt's worker.
pub const REVIEW_SUGGESTIONS_KEY: &str = "_review_suggestions";

/// Run-global key/value context shared across steps.
///
/// Cloning is the deep copy relied on by the snapshot manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext(HashMap<String, serde_json::Value>);

impl RunContext {
    /// Fresh context for a run, seeded with the user goal and trace id.
    pub fn seed(goal: &str, trace_id: TraceId) -> Self {
        let mut context = Self::default();
        context.insert("user_query", serde_json::Value::from(goal));
        context.insert("trace_id", serde_json::Value::from(trace_id.to_string()));
        context
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Context key a step's textual output is published under.
    pub fn step_output_key(id: StepId) -> String {
        format!("step_{}_output", id)
    }

    pub fn set_step_output(&mut self, id: StepId, result: &str) {
        self.insert(Self::step_output_key(id), serde_json::Value::from(result));
    }

    /// Restrict the context to the given keys. Missing keys are returned
    /// separately so the caller can log them; they never fail a step.
    pub fn filter(&self, keys: &[String]) -> (RunContext, Vec<String>) {
        let mut filtered = RunContext::default();
        let mut missing = Vec::new();
        for key in keys {
            match self.0.get(key) {
                Some(value) => filtered.insert(key.clone(), value.clone()),
                None => missing.push(key.clone()),
            }
        }
        (filtered, missing)
    }
}

/// Normalized outcome of reviewing a step result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub passed: bool,
    pub score: f64,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackAction>,
}

/// Scheduling action a failed review translates into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackAction {
    pub kind: RollbackKind,
    pub target_step_id: StepId,
    pub reason: String,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackKind {
    /// Re-run the same step
    Retry,
    /// Restore a snapshot and re-run from the target predecessor
    Revert,
    /// Human intervention required; the step fails permanently
    Escalate,
}
