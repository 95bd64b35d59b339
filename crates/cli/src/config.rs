use anyhow::{Context, Result};
use baton_core::config::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// CLI configuration: engine knobs plus the endpoints of the remote
/// collaborators. Loaded from a TOML file when present, otherwise all
/// defaults; command-line flags override both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: EngineConfig,
    pub endpoints: EndpointsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    #[serde(default = "default_reviewer_url")]
    pub reviewer_url: String,

    #[serde(default = "default_llm_url")]
    pub llm_url: String,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_registry_url() -> String {
    "http://localhost:10000".to_string()
}

fn default_reviewer_url() -> String {
    "http://localhost:10007".to_string()
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_output_dir() -> String {
    "output".to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            reviewer_url: default_reviewer_url(),
            llm_url: default_llm_url(),
            llm_model: default_llm_model(),
            output_dir: default_output_dir(),
        }
    }
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("configuration file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }
}
