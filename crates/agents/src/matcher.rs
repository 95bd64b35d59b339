//! Capability matcher: binds each plan step to a discovered agent, with a
//! per-description TTL cache and an optional LLM-assisted mode that picks
//! from the full registry roster.

use crate::config::{ExecutorConfig, MatcherConfig};
use crate::llm::ChatClient;
use crate::protocol::strip_fence;
use crate::registry::RegistryClient;
use async_trait::async_trait;
use baton_core::error::EngineError;
use baton_core::traits::AgentMatcher;
use baton_core::{AgentCard, ExecutionPlan};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

const MATCH_SYSTEM_PROMPT: &str = "You are an expert at routing tasks to specialized agents. \
Given a task description and the list of available agents, pick the single best agent. \
Return ONLY a JSON object of the form {\"selected_agent\": \"<agent name>\", \"reason\": \"<why>\"}. \
The selected_agent value must be copied verbatim from the list.";

#[derive(Debug, Deserialize)]
struct MatchChoice {
    selected_agent: String,
    #[serde(default)]
    reason: String,
}

pub struct CachedMatcher {
    registry: RegistryClient,
    llm: Option<ChatClient>,
    config: MatcherConfig,
    retry: ExecutorConfig,
    cache: Mutex<HashMap<String, (AgentCard, Instant)>>,
}

impl CachedMatcher {
    pub fn new(registry: RegistryClient, config: MatcherConfig) -> Self {
        Self {
            registry,
            llm: None,
            config,
            retry: ExecutorConfig::default(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Enable assisted matching through the given chat client.
    pub fn with_llm(mut self, llm: ChatClient) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_retry(mut self, retry: ExecutorConfig) -> Self {
        self.retry = retry;
        self
    }

    fn cached(&self, description: &str) -> Option<AgentCard> {
        let mut cache = self.cache.lock().expect("matcher cache poisoned");
        match cache.get(description) {
            Some((card, resolved_at)) if resolved_at.elapsed() < self.config.cache_ttl => {
                Some(card.clone())
            }
            Some(_) => {
                cache.remove(description);
                None
            }
            None => None,
        }
    }

    fn cache_put(&self, description: &str, card: AgentCard) {
        let mut cache = self.cache.lock().expect("matcher cache poisoned");
        cache.insert(description.to_string(), (card, Instant::now()));
    }

    async fn find_with_retry(&self, description: &str) -> Option<AgentCard> {
        for attempt in 1..=self.retry.retry_times.max(1) {
            match self.registry.find_agent(description).await {
                Ok(card) => return card,
                Err(error) => {
                    warn!("find_agent attempt {attempt} failed: {error}");
                    if attempt < self.retry.retry_times {
                        tokio::time::sleep(self.retry.retry_delay).await;
                    }
                }
            }
        }
        None
    }

    async fn llm_pick(&self, description: &str, roster: &[AgentCard]) -> Option<AgentCard> {
        let llm = self.llm.as_ref()?;

        let roster_lines: Vec<String> = roster
            .iter()
            .map(|card| {
                format!(
                    "- {}: {}",
                    card.name,
                    card.description.as_deref().unwrap_or("")
                )
            })
            .collect();
        let user = format!(
            "Task description: {description}\n\nAvailable agents:\n{}",
            roster_lines.join("\n")
        );

        let reply = match llm.complete(MATCH_SYSTEM_PROMPT, &user).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!("assisted matching failed: {error}");
                return None;
            }
        };

        let choice: MatchChoice = match serde_json::from_str(&strip_fence(&reply)) {
            Ok(choice) => choice,
            Err(error) => {
                warn!("assisted matcher returned unparseable choice: {error}");
                return None;
            }
        };

        let found = roster
            .iter()
            .find(|card| card.name == choice.selected_agent)
            .cloned();
        match &found {
            Some(card) => {
                info!("assisted match: {} ({})", card.name, choice.reason);
            }
            None => {
                warn!(
                    "assisted matcher selected unknown agent '{}'",
                    choice.selected_agent
                );
            }
        }
        found
    }
}

#[async_trait]
impl AgentMatcher for CachedMatcher {
    async fn assign(&self, plan: &mut ExecutionPlan) -> Result<(), EngineError> {
        // Assisted mode needs the roster once per plan; a failed fetch just
        // disables it for this run.
        let roster = if self.llm.is_some() {
            match self.registry.list_all_agents().await {
                Ok(roster) => {
                    debug!("loaded {} agents for assisted matching", roster.len());
                    roster
                }
                Err(error) => {
                    warn!("failed to load agent roster: {error}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        for step in &mut plan.steps {
            if step.assigned_agent.is_some() {
                continue;
            }

            if let Some(card) = self.cached(&step.description) {
                debug!(step_id = %step.step_id, "cache hit: {}", card.name);
                step.assigned_agent = Some(card);
                continue;
            }

            let mut card = None;
            if !roster.is_empty() {
                card = self.llm_pick(&step.description, &roster).await;
            }
            if card.is_none() {
                card = self.find_with_retry(&step.description).await;
            }

            match card {
                Some(card) => {
                    info!(step_id = %step.step_id, "matched agent: {}", card.name);
                    self.cache_put(&step.description, card.clone());
                    step.assigned_agent = Some(card);
                }
                None => {
                    warn!(step_id = %step.step_id, "no agent found; step will fail at dispatch");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use baton_core::TaskStep;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plan(descriptions: &[&str]) -> ExecutionPlan {
        let steps = descriptions
            .iter()
            .enumerate()
            .map(|(position, description)| {
                TaskStep::new(position as u32 + 1, format!("S{}", position + 1), *description)
            })
            .collect();
        ExecutionPlan::new("test goal", steps)
    }

    fn card_json(name: &str) -> String {
        format!("{{\"name\": \"{name}\", \"url\": \"http://localhost:9999\"}}")
    }

    fn tool_response(text: &str) -> serde_json::Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {"content": [{"type": "text", "text": text}]}
        })
    }

    fn fast_retry() -> ExecutorConfig {
        ExecutorConfig {
            retry_times: 2,
            retry_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_direct_match_assigns_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(tool_response(&card_json("Researcher"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let matcher = CachedMatcher::new(
            RegistryClient::new(&server.uri()).unwrap(),
            MatcherConfig::default(),
        )
        .with_retry(fast_retry());

        // Two steps with the same description: one registry round-trip
        let mut plan = plan(&["research the topic", "research the topic"]);
        matcher.assign(&mut plan).await.unwrap();

        assert_eq!(
            plan.steps[0].assigned_agent.as_ref().map(|a| a.name.as_str()),
            Some("Researcher")
        );
        assert_eq!(
            plan.steps[1].assigned_agent.as_ref().map(|a| a.name.as_str()),
            Some("Researcher")
        );
    }

    #[tokio::test]
    async fn test_expired_cache_entries_are_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(tool_response(&card_json("Researcher"))),
            )
            .expect(2)
            .mount(&server)
            .await;

        let matcher = CachedMatcher::new(
            RegistryClient::new(&server.uri()).unwrap(),
            MatcherConfig {
                cache_ttl: Duration::from_millis(0),
            },
        )
        .with_retry(fast_retry());

        let mut first = plan(&["research the topic"]);
        matcher.assign(&mut first).await.unwrap();
        let mut second = plan(&["research the topic"]);
        matcher.assign(&mut second).await.unwrap();

        assert!(second.steps[0].assigned_agent.is_some());
    }

    #[tokio::test]
    async fn test_registry_down_leaves_steps_unassigned() {
        let matcher = CachedMatcher::new(
            RegistryClient::new("http://127.0.0.1:1").unwrap(),
            MatcherConfig::default(),
        )
        .with_retry(fast_retry());

        let mut plan = plan(&["anything"]);
        matcher.assign(&mut plan).await.unwrap();
        assert!(plan.steps[0].assigned_agent.is_none());
    }

    #[tokio::test]
    async fn test_assisted_mode_picks_from_roster() {
        let registry = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "params": {"name": "list_all_agents"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_response(
                "[{\"name\": \"Researcher\", \"url\": \"http://localhost:10001\", \"description\": \"finds facts\"}, {\"name\": \"Writer\", \"url\": \"http://localhost:10002\", \"description\": \"writes prose\"}]",
            )))
            .expect(1)
            .mount(&registry)
            .await;

        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {
                    "role": "assistant",
                    "content": "{\"selected_agent\": \"Writer\", \"reason\": \"prose task\"}"
                }}]
            })))
            .mount(&llm)
            .await;

        let matcher = CachedMatcher::new(
            RegistryClient::new(&registry.uri()).unwrap(),
            MatcherConfig::default(),
        )
        .with_llm(
            ChatClient::new(LlmConfig::new(format!("{}/v1", llm.uri()))).unwrap(),
        )
        .with_retry(fast_retry());

        let mut plan = plan(&["write the introduction"]);
        matcher.assign(&mut plan).await.unwrap();

        let agent = plan.steps[0].assigned_agent.as_ref().unwrap();
        assert_eq!(agent.name, "Writer");
        assert_eq!(agent.url.as_deref(), Some("http://localhost:10002"));
    }

    #[tokio::test]
    async fn test_unknown_llm_choice_falls_back_to_direct_lookup() {
        let registry = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "params": {"name": "list_all_agents"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_response(
                "[{\"name\": \"Researcher\", \"url\": \"http://localhost:10001\"}]",
            )))
            .mount(&registry)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "params": {"name": "find_agent"}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(tool_response(&card_json("Researcher"))),
            )
            .expect(1)
            .mount(&registry)
            .await;

        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {
                    "role": "assistant",
                    "content": "{\"selected_agent\": \"Ghost Agent\", \"reason\": \"hallucinated\"}"
                }}]
            })))
            .mount(&llm)
            .await;

        let matcher = CachedMatcher::new(
            RegistryClient::new(&registry.uri()).unwrap(),
            MatcherConfig::default(),
        )
        .with_llm(
            ChatClient::new(LlmConfig::new(format!("{}/v1", llm.uri()))).unwrap(),
        )
        .with_retry(fast_retry());

        let mut plan = plan(&["research the topic"]);
        matcher.assign(&mut plan).await.unwrap();
        assert_eq!(
            plan.steps[0].assigned_agent.as_ref().map(|a| a.name.as_str()),
            Some("Researcher")
        );
    }
}
