//! Registry discovery client: `find_agent` and `list_all_agents` tool
//! calls over JSON-RPC.

use crate::error::{AgentsError, AgentsResult};
use crate::protocol::{strip_fence, CallToolResult, JsonRpcRequest};
use baton_core::AgentCard;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl RegistryClient {
    pub fn new(endpoint: &str) -> AgentsResult<Self> {
        Self::with_timeout(endpoint, Duration::from_secs(30))
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> AgentsResult<Self> {
        let endpoint = Url::parse(endpoint)?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoint })
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> AgentsResult<CallToolResult> {
        let request = JsonRpcRequest::tool_call(name, arguments);
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentsError::api(status, body));
        }

        let rpc: crate::protocol::JsonRpcResponse = response.json().await?;
        if let Some(error) = rpc.error {
            return Err(AgentsError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = rpc
            .result
            .ok_or_else(|| AgentsError::Empty(name.to_string()))?;
        Ok(serde_json::from_value(result)?)
    }

    /// Ask the registry for the best agent matching a task description.
    pub async fn find_agent(&self, query: &str) -> AgentsResult<Option<AgentCard>> {
        info!("calling find_agent: '{}'", truncate(query, 50));
        let result = self
            .call_tool("find_agent", serde_json::json!({"query": query}))
            .await?;

        let Some(text) = result.first_text() else {
            return Ok(None);
        };
        let cleaned = strip_fence(text);
        if cleaned.is_empty() {
            warn!("empty find_agent response for '{}'", truncate(query, 50));
            return Ok(None);
        }

        match serde_json::from_str::<AgentCard>(&cleaned) {
            Ok(card) => Ok(Some(card)),
            Err(error) => {
                warn!(
                    "failed to parse agent card: {error} (text: '{}')",
                    truncate(&cleaned, 100)
                );
                Ok(None)
            }
        }
    }

    /// Full roster of registered agents, used by assisted matching.
    pub async fn list_all_agents(&self) -> AgentsResult<Vec<AgentCard>> {
        let result = self.call_tool("list_all_agents", serde_json::json!({})).await?;
        let Some(text) = result.first_text() else {
            return Ok(Vec::new());
        };

        match serde_json::from_str::<Vec<AgentCard>>(&strip_fence(text)) {
            Ok(agents) => Ok(agents),
            Err(error) => {
                warn!("failed to parse agent roster: {error}");
                Ok(Vec::new())
            }
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
