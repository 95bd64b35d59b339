use anyhow::Result;
use baton_agents::{
    CachedMatcher, ExecutorConfig, LlmConfig, LlmPlanner, MatcherConfig, RegistryClient,
    RemoteReviewer, WorkerClient,
};
use baton_core::config::{EngineConfig, ReviewConfig};
use baton_core::engine::WorkflowEngine;
use baton_core::events::{EventPhase, StepSummary, WorkflowEvent};
use baton_core::StepId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::StreamExt;

mod config;
mod output;

use config::CliConfig;

#[derive(Parser, Debug)]
#[command(name = "baton")]
#[command(about = "Multi-agent workflow orchestrator", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "baton.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a goal through the orchestration engine
    Run {
        /// The natural-language goal to execute
        goal: String,

        /// Disable the review gate entirely
        #[arg(long)]
        no_review: bool,

        /// Review every step instead of only the final result
        #[arg(long)]
        review_all: bool,

        /// Minimum review score to pass (0-1)
        #[arg(long)]
        threshold: Option<f64>,

        /// Per-step retry budget
        #[arg(long)]
        max_retries: Option<u32>,

        /// Disable snapshot rollback (reverts degrade to retries)
        #[arg(long)]
        no_rollback: bool,

        /// Step ids that must always be reviewed, comma separated (e.g. 1,3)
        #[arg(long)]
        critical_steps: Option<String>,

        /// Wave concurrency cap
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Registry endpoint
        #[arg(long, env = "BATON_REGISTRY_URL")]
        registry_url: Option<String>,

        /// Reviewer agent endpoint
        #[arg(long, env = "BATON_REVIEWER_URL")]
        reviewer_url: Option<String>,

        /// OpenAI-compatible chat endpoint for planning and matching
        #[arg(long, env = "BATON_LLM_URL")]
        llm_url: Option<String>,

        #[arg(long, env = "BATON_LLM_MODEL")]
        llm_model: Option<String>,

        #[arg(long, env = "BATON_LLM_API_KEY", hide_env_values = true)]
        llm_api_key: Option<String>,

        /// Directory results are rendered into
        #[arg(long)]
        output_dir: Option<String>,
    },
    /// Print an engine configuration preset as TOML
    ShowConfig {
        #[arg(value_parser = ["default", "strict", "lenient"], default_value = "default")]
        preset: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "baton=info".into()),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Run {
            goal,
            no_review,
            review_all,
            threshold,
            max_retries,
            no_rollback,
            critical_steps,
            max_parallel,
            registry_url,
            reviewer_url,
            llm_url,
            llm_model,
            llm_api_key,
            output_dir,
        } => {
            let mut config = CliConfig::load(&args.config)?;

            if no_review {
                config.engine.review.enabled = false;
            }
            if review_all {
                config.engine.review.review_all_steps = true;
                config.engine.review.review_final_only = false;
            }
            if let Some(threshold) = threshold {
                config.engine.review.quality_threshold = threshold;
            }
            if let Some(max_retries) = max_retries {
                config.engine.review.max_retries = max_retries;
            }
            if no_rollback {
                config.engine.review.enable_rollback = false;
            }
            if let Some(critical_steps) = critical_steps {
                config.engine.review.critical_steps = parse_critical_steps(&critical_steps)?;
            }
            if let Some(max_parallel) = max_parallel {
                config.engine.parallel.max_parallel = max_parallel;
            }
            if let Some(registry_url) = registry_url {
                config.endpoints.registry_url = registry_url;
            }
            if let Some(reviewer_url) = reviewer_url {
                config.endpoints.reviewer_url = reviewer_url;
            }
            if let Some(llm_url) = llm_url {
                config.endpoints.llm_url = llm_url;
            }
            if let Some(llm_model) = llm_model {
                config.endpoints.llm_model = llm_model;
            }
            if let Some(output_dir) = output_dir {
                config.endpoints.output_dir = output_dir;
            }

            run(&goal, config, llm_api_key).await
        }
        Command::ShowConfig { preset } => {
            let review = match preset.as_str() {
                "strict" => ReviewConfig::strict(),
                "lenient" => ReviewConfig::lenient(),
                _ => ReviewConfig::default(),
            };
            let config = EngineConfig {
                review,
                ..EngineConfig::default()
            };
            println!("# engine configuration preset: {preset}");
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn parse_critical_steps(raw: &str) -> Result<std::collections::BTreeSet<StepId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .map(StepId)
                .map_err(|_| anyhow::anyhow!("invalid step id in --critical-steps: '{part}'"))
        })
        .collect()
}

async fn run(goal: &str, config: CliConfig, llm_api_key: Option<String>) -> Result<()> {
    let mut llm_config =
        LlmConfig::new(&config.endpoints.llm_url).with_model(&config.endpoints.llm_model);
    if let Some(api_key) = llm_api_key {
        llm_config = llm_config.with_api_key(api_key);
    }
    let llm = baton_agents::ChatClient::new(llm_config)?;

    let registry = RegistryClient::new(&config.endpoints.registry_url)?;
    let matcher = CachedMatcher::new(registry, MatcherConfig::default()).with_llm(llm.clone());
    let planner = LlmPlanner::new(llm);
    let executor = WorkerClient::new(ExecutorConfig::default())?;
    let reviewer = RemoteReviewer::new(
        config.endpoints.reviewer_url.clone(),
        &ExecutorConfig::default(),
    )?;

    let engine = WorkflowEngine::new(
        Arc::new(planner),
        Arc::new(matcher),
        Arc::new(executor),
        Arc::new(reviewer),
        config.engine,
    );

    let mut stream = engine.stream(goal);
    let mut steps: Vec<StepSummary> = Vec::new();
    let mut trace_id = None;
    while let Some(event) = stream.next().await {
        trace_id = Some(event.trace_id);
        if let EventPhase::Parsing { steps: parsed } = &event.phase {
            steps = parsed.clone();
        }
        print_event(&event);
    }

    if let Some(trace_id) = trace_id {
        if let Some(context) = engine.context(trace_id) {
            let output_dir = PathBuf::from(&config.endpoints.output_dir);
            if let Some(path) = output::save_result(goal, &steps, &context, trace_id, &output_dir)?
            {
                println!("result saved to {}", path.display());
            }
        }
    }
    Ok(())
}

fn print_event(event: &WorkflowEvent) {
    match &event.phase {
        EventPhase::Start => println!("[start] {}", event.content),
        EventPhase::Progress => println!("[....] {}", event.content),
        EventPhase::Parsing { steps } => {
            println!("[plan] {}", event.content);
            for step in steps {
                let dependencies = if step.dependencies.is_empty() {
                    "no dependencies".to_string()
                } else {
                    format!(
                        "depends on {}",
                        step.dependencies
                            .iter()
                            .map(|id| id.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                };
                println!("       step {}: {} ({})", step.step_id, step.name, dependencies);
            }
        }
        EventPhase::Matching { assignments } => {
            println!("[match] {}", event.content);
            for assignment in assignments {
                println!(
                    "       step {} -> {}",
                    assignment.step_id,
                    assignment.worker.as_deref().unwrap_or("(unmatched)")
                );
            }
        }
        EventPhase::Execution { batch_steps } => {
            let ids: Vec<String> = batch_steps.iter().map(|id| id.to_string()).collect();
            println!("[exec] wave: steps {}", ids.join(", "));
        }
        EventPhase::StepComplete {
            step_id,
            step_name,
            result_preview,
            review_score,
            review_passed,
        } => {
            let review = match (review_score, review_passed) {
                (Some(score), Some(passed)) => {
                    format!(" [review: {} {score:.2}]", if *passed { "pass" } else { "fail" })
                }
                _ => String::new(),
            };
            println!("[done] step {step_id} ({step_name}){review}: {result_preview}");
        }
        EventPhase::Rollback { rollback_target } => {
            println!("[back] reverting to step {rollback_target}");
        }
        EventPhase::FinalReview {
            review_passed,
            review_score,
            issues,
            suggestions,
        } => {
            println!(
                "[review] final review {} (score {review_score:.2})",
                if *review_passed { "passed" } else { "failed" }
            );
            for issue in issues {
                println!("       issue: {issue}");
            }
            for suggestion in suggestions {
                println!("       suggestion: {suggestion}");
            }
        }
        EventPhase::Complete {
            total_steps,
            successful_steps,
        } => {
            println!(
                "[done] {} ({successful_steps}/{total_steps} steps, trace {})",
                event.content, event.trace_id
            );
        }
        EventPhase::Error { step_id, kind, error } => match step_id {
            Some(step_id) => println!("[fail] step {step_id} ({kind}): {error}"),
            None => println!("[fail] ({kind}): {error}"),
        },
    }
}
