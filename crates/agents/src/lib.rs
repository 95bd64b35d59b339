//! Remote collaborator facades for the Baton orchestration core.
//!
//! Everything that touches the network lives here: the A2A-style worker
//! client, the registry discovery client with its TTL-cached matcher, the
//! remote reviewer, and the LLM-backed planner. The core consumes these
//! through the traits in `baton_core::traits`.

pub mod config;
pub mod error;
pub mod llm;
pub mod matcher;
pub mod planner;
pub mod protocol;
pub mod registry;
pub mod reviewer;
pub mod worker;

pub use config::{ExecutorConfig, LlmConfig, MatcherConfig};
pub use error::{AgentsError, AgentsResult};
pub use llm::ChatClient;
pub use matcher::CachedMatcher;
pub use planner::LlmPlanner;
pub use registry::RegistryClient;
pub use reviewer::RemoteReviewer;
pub use worker::WorkerClient;
