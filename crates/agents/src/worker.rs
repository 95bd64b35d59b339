//! Worker invocation facade: executes a step against its assigned agent
//! over the A2A-style `sendMessage` transport.

use crate::config::ExecutorConfig;
use crate::error::{AgentsError, AgentsResult};
use crate::protocol::{extract_reply, strip_fence, SendMessageRequest};
use async_trait::async_trait;
use baton_core::traits::{ExecOutcome, StepExecutor};
use baton_core::{RunContext, StepStatus, TaskStep, TraceId};
use chrono::Utc;
use tracing::{info, warn};

pub struct WorkerClient {
    http: reqwest::Client,
    config: ExecutorConfig,
}

impl WorkerClient {
    pub fn new(config: ExecutorConfig) -> AgentsResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    async fn call_agent(&self, url: &str, payload: String) -> AgentsResult<String> {
        let frame = SendMessageRequest::user_text(payload);
        let response = self.http.post(url).json(&frame).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentsError::api(status, body));
        }

        let text = response.text().await?;
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(body) => Ok(extract_reply(&body)),
            Err(error) => {
                // Unparseable envelope: fall back to the raw body
                warn!("failed to decode worker envelope ({error}), using raw body");
                Ok(strip_fence(&text))
            }
        }
    }
}

#[async_trait]
impl StepExecutor for WorkerClient {
    async fn execute(
        &self,
        mut step: TaskStep,
        context: &RunContext,
        trace_id: TraceId,
    ) -> ExecOutcome {
        step.status = StepStatus::Running;
        step.start_time = Some(Utc::now());
        step.error = None;

        let agent_name = step
            .assigned_agent
            .as_ref()
            .map(|a| a.name.clone())
            .unwrap_or_else(|| "none".to_string());
        info!(%trace_id, step_id = %step.step_id, agent = %agent_name, "invoking agent");

        let url = step
            .assigned_agent
            .as_ref()
            .and_then(|agent| agent.url.clone());
        let Some(url) = url else {
            warn!(step_id = %step.step_id, "no agent assigned to this step");
            step.status = StepStatus::Failed;
            step.error = Some("no agent assigned to this step".to_string());
            step.end_time = Some(Utc::now());
            return ExecOutcome {
                step,
                result: String::new(),
                failed_attempts: 1,
            };
        };

        let (filtered, missing) = context.filter(&step.context_keys);
        for key in &missing {
            warn!(step_id = %step.step_id, "context key '{key}' not found");
        }
        let payload = serde_json::json!({
            "task_description": step.description,
            "context": filtered,
        })
        .to_string();

        let mut failed_attempts = 0u32;
        let mut last_error = String::new();
        for attempt in 1..=self.config.retry_times.max(1) {
            match self.call_agent(&url, payload.clone()).await {
                Ok(result) => {
                    step.status = StepStatus::Success;
                    step.result = Some(result.clone());
                    step.end_time = Some(Utc::now());
                    return ExecOutcome {
                        step,
                        result,
                        failed_attempts,
                    };
                }
                Err(error) => {
                    failed_attempts += 1;
                    last_error = error.to_string();
                    if attempt < self.config.retry_times {
                        warn!(
                            step_id = %step.step_id,
                            "attempt {attempt} failed: {error}, retrying in {:?}",
                            self.config.retry_delay
                        );
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        step.status = StepStatus::Failed;
        step.error = Some(last_error);
        step.end_time = Some(Utc::now());
        ExecOutcome {
            step,
            result: String::new(),
            failed_attempts,
        }
    }
}
