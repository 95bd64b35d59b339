//! LLM-backed planner: decomposes a natural-language goal into an
//! execution plan of parallelizable steps.

use crate::llm::ChatClient;
use async_trait::async_trait;
use baton_core::error::EngineError;
use baton_core::traits::Planner;
use baton_core::{ExecutionPlan, TaskStep};
use serde::Deserialize;
use tracing::info;

const PLANNING_PROMPT: &str = r#"You are a senior systems architect who decomposes goals into plans for specialized AI agents.

Break the user's goal into single, executable subtasks. Each step must:
1. Be one concrete task a specialized agent can complete on its own.
2. Have a clear, concise description phrased for agent discovery (no vague language).
3. List the context keys it consumes (use "step_N_output" to reference step N's result).
4. List the step ids it depends on (empty list when independent). Independent steps run in parallel, so split unrelated work into separate dependency-free steps.
5. Carry a unique sequential step_id starting at 1.

Keep plans between 3 and 10 steps for most goals, fewer for trivial ones, and never create circular dependencies.

Return ONLY a JSON object with this exact structure:
{
  "steps": [
    {
      "step_id": 1,
      "name": "short label",
      "description": "what this step does",
      "context_keys": [],
      "dependencies": []
    }
  ]
}"#;

#[derive(Debug, Deserialize)]
struct PlanDraft {
    #[serde(default)]
    steps: Vec<TaskStep>,
}

pub struct LlmPlanner {
    llm: ChatClient,
}

impl LlmPlanner {
    pub fn new(llm: ChatClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn parse(&self, goal: &str) -> Result<ExecutionPlan, EngineError> {
        info!("decomposing goal: '{goal}'");
        let user = format!("Goal: {goal}\n\nDecompose this goal into executable steps.");

        let reply = self
            .llm
            .complete(PLANNING_PROMPT, &user)
            .await
            .map_err(|error| EngineError::Parser(error.to_string()))?;

        let draft: PlanDraft = serde_json::from_str(extract_json(&reply))
            .map_err(|error| EngineError::Parser(format!("plan JSON did not parse: {error}")))?;
        if draft.steps.is_empty() {
            return Err(EngineError::Parser("planner returned no steps".to_string()));
        }

        info!("plan generated with {} steps", draft.steps.len());
        Ok(ExecutionPlan::new(goal, draft.steps))
    }
}

/// Pull the JSON object out of a reply that may wrap it in markdown fences
/// or surrounding prose.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    trimmed
}
