//! Configuration for the agent facades.

use std::time::Duration;

/// Retry and timeout settings for worker and registry calls.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// HTTP attempts per invocation
    pub retry_times: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Per-attempt deadline
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_times: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Matcher cache settings.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// How long a resolved worker stays cached per step description
    pub cache_ttl: Duration,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(600),
        }
    }
}

/// Connection settings for the OpenAI-compatible chat endpoint used by the
/// planner and the assisted matcher.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL up to and including the API version segment, e.g.
    /// `http://localhost:11434/v1`
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}
