//! Remote reviewer client over the agent transport.
//!
//! The reviewer is itself an agent: it receives the task, the result and
//! the surrounding context, and answers with a structured verdict. Policy
//! (thresholds, rollback synthesis, leniency) lives in the core's review
//! gate; this client only moves bytes.

use crate::config::ExecutorConfig;
use crate::error::AgentsResult;
use crate::protocol::{extract_reply, SendMessageRequest};
use anyhow::Context;
use async_trait::async_trait;
use baton_core::review::{RemoteVerdict, ReviewClient, ReviewRequest};

pub struct RemoteReviewer {
    http: reqwest::Client,
    url: String,
}

impl RemoteReviewer {
    pub fn new(url: impl Into<String>, config: &ExecutorConfig) -> AgentsResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    async fn send(&self, payload: String) -> anyhow::Result<RemoteVerdict> {
        let frame = SendMessageRequest::user_text(payload);
        let response = self
            .http
            .post(&self.url)
            .json(&frame)
            .send()
            .await
            .context("reviewer request failed")?;
        let status = response.status();
        anyhow::ensure!(status.is_success(), "reviewer returned status {status}");

        let body: serde_json::Value = response
            .json()
            .await
            .context("reviewer response was not JSON")?;
        let reply = extract_reply(&body);
        serde_json::from_str(&reply)
            .with_context(|| format!("reviewer verdict did not parse: '{reply}'"))
    }
}

#[async_trait]
impl ReviewClient for RemoteReviewer {
    async fn review_step(&self, request: &ReviewRequest) -> anyhow::Result<RemoteVerdict> {
        let payload = serde_json::json!({
            "task_description": request.task_description,
            "result": request.result,
            "context": request.context,
            "step_id": request.step_id,
            "dependencies": request.dependencies,
        });
        self.send(payload.to_string()).await
    }

    async fn review_final(&self, goal: &str, transcript: &str) -> anyhow::Result<RemoteVerdict> {
        let payload = serde_json::json!({
            "task_description": format!(
                "Review whether the combined result below satisfies the goal: {goal}"
            ),
            "result": transcript,
            "context": {},
            "dependencies": [],
        });
        self.send(payload.to_string()).await
    }
}
