// Core orchestration engine for Baton multi-agent workflows

pub mod config;
pub mod dag;
pub mod engine;
pub mod error;
pub mod events;
pub mod review;
pub mod snapshot;
pub mod traits;
pub mod types;

pub use types::*;
