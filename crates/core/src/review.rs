use crate::config::ReviewConfig;
use crate::types::{ReviewVerdict, RollbackAction, RollbackKind, RunContext, StepId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Payload handed to the remote reviewer for a single step.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewRequest {
    pub step_id: StepId,
    pub task_description: String,
    pub result: String,
    pub context: RunContext,
    pub dependencies: Vec<StepId>,
}

/// Raw verdict as produced by the remote reviewer, before the gate
/// normalizes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteVerdict {
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_recommendation: Option<RollbackAdvice>,
}

/// Advisory rollback hint from the remote reviewer. The gate synthesizes
/// the action it actually takes from the score bands; the advice only
/// contributes its reason text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackAdvice {
    pub action_type: String,
    #[serde(default)]
    pub target_step_id: Option<StepId>,
    #[serde(default)]
    pub reason: String,
}

/// Transport to the remote quality reviewer.
#[async_trait]
pub trait ReviewClient: Send + Sync {
    async fn review_step(&self, request: &ReviewRequest) -> anyhow::Result<RemoteVerdict>;

    /// Review the combined transcript of all successful steps against the
    /// original goal.
    async fn review_final(&self, goal: &str, transcript: &str) -> anyhow::Result<RemoteVerdict>;
}

/// Normalizes remote verdicts into scheduling decisions.
///
/// The gate owns the pass/fail decision (score against the configured
/// threshold, overriding whatever boolean the remote sent) and synthesizes
/// the rollback action from the score. A reviewer outage yields a lenient
/// pass so the reviewer is never a single point of failure.
#[derive(Clone)]
pub struct ReviewGate {
    client: Arc<dyn ReviewClient>,
    config: ReviewConfig,
}

impl ReviewGate {
    pub fn new(client: Arc<dyn ReviewClient>, config: ReviewConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    /// Whether this step's output should be reviewed at all.
    pub fn should_review(&self, step_id: StepId, is_final: bool) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.config.review_all_steps {
            return true;
        }
        if self.config.critical_steps.contains(&step_id) {
            return true;
        }
        is_final && self.config.review_final_only
    }

    pub async fn review_step(&self, request: &ReviewRequest) -> ReviewVerdict {
        match self.client.review_step(request).await {
            Ok(raw) => self.normalize(request.step_id, &request.dependencies, raw),
            Err(error) => {
                tracing::warn!(
                    step_id = %request.step_id,
                    "reviewer unavailable, passing leniently: {error:#}"
                );
                self.lenient(error)
            }
        }
    }

    pub async fn review_final(&self, goal: &str, transcript: &str) -> ReviewVerdict {
        match self.client.review_final(goal, transcript).await {
            Ok(raw) => ReviewVerdict {
                passed: raw.score >= self.config.quality_threshold,
                score: raw.score,
                issues: raw.issues,
                suggestions: raw.suggestions,
                rollback: None,
            },
            Err(error) => {
                tracing::warn!("final reviewer unavailable, passing leniently: {error:#}");
                self.lenient(error)
            }
        }
    }

    fn normalize(
        &self,
        step_id: StepId,
        dependencies: &[StepId],
        raw: RemoteVerdict,
    ) -> ReviewVerdict {
        let passed = raw.score >= self.config.quality_threshold;
        let rollback = if passed {
            None
        } else {
            Some(self.synthesize(step_id, dependencies, raw.score, raw.rollback_recommendation.as_ref()))
        };
        ReviewVerdict {
            passed,
            score: raw.score,
            issues: raw.issues,
            suggestions: raw.suggestions,
            rollback,
        }
    }

    /// Map a failing score onto a scheduling action:
    /// score >= 0.5 retries the step, [0.3, 0.5) reverts to the most
    /// recent predecessor, below 0.3 escalates to a human.
    fn synthesize(
        &self,
        step_id: StepId,
        dependencies: &[StepId],
        score: f64,
        advice: Option<&RollbackAdvice>,
    ) -> RollbackAction {
        let reason = advice
            .filter(|a| !a.reason.is_empty())
            .map(|a| a.reason.clone())
            .unwrap_or_else(|| format!("review score {score:.2} below threshold"));

        let (kind, target_step_id) = if score >= 0.5 {
            (RollbackKind::Retry, step_id)
        } else if score >= 0.3 {
            match dependencies.iter().max() {
                Some(target) if self.config.enable_rollback => (RollbackKind::Revert, *target),
                // No predecessor to revert to, or rollback disabled
                _ => (RollbackKind::Retry, step_id),
            }
        } else {
            (RollbackKind::Escalate, step_id)
        };

        RollbackAction {
            kind,
            target_step_id,
            reason,
            max_retries: self.config.max_retries,
        }
    }

    fn lenient(&self, error: anyhow::Error) -> ReviewVerdict {
        ReviewVerdict {
            passed: true,
            score: 0.7,
            issues: vec![format!("reviewer unavailable: {error:#}")],
            suggestions: Vec::new(),
            rollback: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedClient {
        verdict: Option<RemoteVerdict>,
    }

    impl ScriptedClient {
        fn scoring(score: f64) -> Arc<Self> {
            Arc::new(Self {
                verdict: Some(RemoteVerdict {
                    passed: score >= 0.7,
                    score,
                    issues: vec![],
                    suggestions: vec!["tighten the summary".to_string()],
                    rollback_recommendation: None,
                }),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { verdict: None })
        }
    }

    #[async_trait]
    impl ReviewClient for ScriptedClient {
        async fn review_step(&self, _request: &ReviewRequest) -> anyhow::Result<RemoteVerdict> {
            self.verdict
                .clone()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))
        }

        async fn review_final(
            &self,
            _goal: &str,
            _transcript: &str,
        ) -> anyhow::Result<RemoteVerdict> {
            self.verdict
                .clone()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))
        }
    }

    fn request(dependencies: Vec<u32>) -> ReviewRequest {
        ReviewRequest {
            step_id: StepId(3),
            task_description: "summarize the findings".to_string(),
            result: "a summary".to_string(),
            context: RunContext::default(),
            dependencies: dependencies.into_iter().map(StepId).collect(),
        }
    }

    fn gate(score: f64, config: ReviewConfig) -> ReviewGate {
        ReviewGate::new(ScriptedClient::scoring(score), config)
    }

    #[tokio::test]
    async fn test_threshold_overrides_remote_boolean() {
        // Remote says failed (passed=false at 0.75 with its own 0.8 bar),
        // but our threshold is 0.7, so the gate passes it.
        let client = Arc::new(ScriptedClient {
            verdict: Some(RemoteVerdict {
                passed: false,
                score: 0.75,
                ..Default::default()
            }),
        });
        let gate = ReviewGate::new(client, ReviewConfig::default());

        let verdict = gate.review_step(&request(vec![])).await;
        assert!(verdict.passed);
        assert!(verdict.rollback.is_none());
    }

    #[tokio::test]
    async fn test_mid_score_retries_same_step() {
        let verdict = gate(0.6, ReviewConfig::default())
            .review_step(&request(vec![1, 2]))
            .await;

        assert!(!verdict.passed);
        let action = verdict.rollback.unwrap();
        assert_eq!(action.kind, RollbackKind::Retry);
        assert_eq!(action.target_step_id, StepId(3));
        assert_eq!(action.max_retries, 3);
    }

    #[tokio::test]
    async fn test_low_score_reverts_to_latest_predecessor() {
        let verdict = gate(0.4, ReviewConfig::default())
            .review_step(&request(vec![1, 2]))
            .await;

        let action = verdict.rollback.unwrap();
        assert_eq!(action.kind, RollbackKind::Revert);
        assert_eq!(action.target_step_id, StepId(2));
    }

    #[tokio::test]
    async fn test_low_score_without_predecessors_retries() {
        let verdict = gate(0.4, ReviewConfig::default())
            .review_step(&request(vec![]))
            .await;

        let action = verdict.rollback.unwrap();
        assert_eq!(action.kind, RollbackKind::Retry);
    }

    #[tokio::test]
    async fn test_rollback_disabled_degrades_revert_to_retry() {
        let config = ReviewConfig {
            enable_rollback: false,
            ..ReviewConfig::default()
        };
        let verdict = gate(0.4, config).review_step(&request(vec![1, 2])).await;

        let action = verdict.rollback.unwrap();
        assert_eq!(action.kind, RollbackKind::Retry);
        assert_eq!(action.target_step_id, StepId(3));
    }

    #[tokio::test]
    async fn test_bottom_score_escalates() {
        let verdict = gate(0.2, ReviewConfig::default())
            .review_step(&request(vec![1]))
            .await;

        let action = verdict.rollback.unwrap();
        assert_eq!(action.kind, RollbackKind::Escalate);
    }

    #[tokio::test]
    async fn test_reviewer_outage_passes_leniently() {
        let gate = ReviewGate::new(ScriptedClient::failing(), ReviewConfig::default());

        let verdict = gate.review_step(&request(vec![1])).await;
        assert!(verdict.passed);
        assert_eq!(verdict.score, 0.7);
        assert!(verdict.issues[0].contains("reviewer unavailable"));

        let final_verdict = gate.review_final("goal", "transcript").await;
        assert!(final_verdict.passed);
    }

    #[test]
    fn test_should_review_matrix() {
        let client = ScriptedClient::scoring(1.0);

        let disabled = ReviewGate::new(client.clone(), ReviewConfig::disabled());
        assert!(!disabled.should_review(StepId(1), true));

        let all = ReviewGate::new(
            client.clone(),
            ReviewConfig {
                review_all_steps: true,
                ..ReviewConfig::default()
            },
        );
        assert!(all.should_review(StepId(1), false));

        let critical = ReviewGate::new(
            client.clone(),
            ReviewConfig {
                critical_steps: [StepId(2)].into_iter().collect(),
                review_final_only: false,
                ..ReviewConfig::default()
            },
        );
        assert!(critical.should_review(StepId(2), false));
        assert!(!critical.should_review(StepId(1), false));

        let final_only = ReviewGate::new(client, ReviewConfig::default());
        assert!(final_only.should_review(StepId(1), true));
        assert!(!final_only.should_review(StepId(1), false));
    }

    #[test]
    fn test_remote_verdict_wire_shape() {
        let verdict: RemoteVerdict = serde_json::from_str(
            r#"{
                "passed": false,
                "score": 0.45,
                "issues": ["missing citations"],
                "suggestions": ["cite sources"],
                "rollback_recommendation": {
                    "action_type": "revert",
                    "target_step_id": 1,
                    "reason": "input data was weak"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(verdict.score, 0.45);
        let advice = verdict.rollback_recommendation.unwrap();
        assert_eq!(advice.action_type, "revert");
        assert_eq!(advice.target_step_id, Some(StepId(1)));
    }
}
