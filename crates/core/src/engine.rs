use crate::config::{EngineConfig, FailStrategy};
use crate::dag::PlanDag;
use crate::error::EngineError;
use crate::events::{preview, Assignment, EventPhase, StepSummary, WorkflowEvent};
use crate::review::{ReviewClient, ReviewGate, ReviewRequest};
use crate::snapshot::{ExecutionSnapshot, SnapshotManager, StepState};
use crate::traits::{AgentMatcher, Planner, StepExecutor};
use crate::types::{
    ExecutionPlan, ReviewVerdict, RollbackKind, RunContext, StepId, StepStatus, TaskStep,
    TraceId, REVIEW_SUGGESTIONS_KEY,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Wave-driven workflow engine.
///
/// Parses a goal into a DAG of steps, binds workers through the matcher,
/// executes waves of ready steps with bounded parallelism, reviews outputs
/// through the review gate and reverts to snapshots when a verdict demands
/// it. Every state transition is emitted on the run's event stream.
#[derive(Clone)]
pub struct WorkflowEngine {
    planner: Arc<dyn Planner>,
    matcher: Arc<dyn AgentMatcher>,
    executor: Arc<dyn StepExecutor>,
    review: ReviewGate,
    snapshots: Arc<SnapshotManager>,
    config: EngineConfig,
    // retry[trace][step]: failed attempts consumed, observable after a run
    retries: Arc<Mutex<HashMap<TraceId, HashMap<StepId, u32>>>>,
    contexts: Arc<Mutex<HashMap<TraceId, RunContext>>>,
}

/// Final accounting of one run, produced by [`WorkflowEngine::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub trace_id: TraceId,
    pub total_steps: usize,
    pub successful_steps: usize,
    /// Whether the run reached its terminal Complete event
    pub completed: bool,
    pub events: Vec<WorkflowEvent>,
}

impl RunReport {
    fn from_events(events: Vec<WorkflowEvent>) -> Self {
        let trace_id = events.first().map(|e| e.trace_id).unwrap_or_default();
        let mut report = Self {
            trace_id,
            total_steps: 0,
            successful_steps: 0,
            completed: false,
            events,
        };
        for event in &report.events {
            if let EventPhase::Complete {
                total_steps,
                successful_steps,
            } = event.phase
            {
                report.total_steps = total_steps;
                report.successful_steps = successful_steps;
                report.completed = true;
            }
        }
        report
    }
}

struct RunStats {
    total_steps: usize,
    successful_steps: usize,
}

impl WorkflowEngine {
    pub fn new(
        planner: Arc<dyn Planner>,
        matcher: Arc<dyn AgentMatcher>,
        executor: Arc<dyn StepExecutor>,
        review_client: Arc<dyn ReviewClient>,
        config: EngineConfig,
    ) -> Self {
        let snapshots = Arc::new(SnapshotManager::new(config.snapshot.max_per_trace));
        let review = ReviewGate::new(review_client, config.review.clone());
        Self {
            planner,
            matcher,
            executor,
            review,
            snapshots,
            config,
            retries: Arc::new(Mutex::new(HashMap::new())),
            contexts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Retry counter for a step, observable during and after a run.
    pub fn retry_count(&self, trace_id: TraceId, step_id: StepId) -> u32 {
        let retries = self.retries.lock().expect("retry store poisoned");
        retries
            .get(&trace_id)
            .and_then(|counters| counters.get(&step_id))
            .copied()
            .unwrap_or(0)
    }

    /// Final run context of a completed trace.
    pub fn context(&self, trace_id: TraceId) -> Option<RunContext> {
        let contexts = self.contexts.lock().expect("context store poisoned");
        contexts.get(&trace_id).cloned()
    }

    /// Remaining snapshots for a trace (zero once the run finished).
    pub fn snapshot_count(&self, trace_id: TraceId) -> usize {
        self.snapshots.snapshot_count(trace_id)
    }

    /// Execute a goal, emitting events as the run progresses.
    ///
    /// Dropping the returned stream cancels the run: in-flight step tasks
    /// are aborted at their next suspension point.
    pub fn stream(&self, goal: impl Into<String>) -> ReceiverStream<WorkflowEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = self.clone();
        let goal = goal.into();
        tokio::spawn(async move {
            engine.run_to_channel(goal, tx).await;
        });
        ReceiverStream::new(rx)
    }

    /// Execute a goal to completion and return the collected events.
    pub async fn run(&self, goal: impl Into<String>) -> RunReport {
        let mut stream = self.stream(goal);
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        RunReport::from_events(events)
    }

    async fn run_to_channel(self, goal: String, tx: mpsc::Sender<WorkflowEvent>) {
        let trace_id = TraceId::new();
        let sink = EventSink { trace_id, tx };

        tracing::info!(%trace_id, "workflow started: {goal}");
        if sink
            .emit(format!("received goal: {goal}"), EventPhase::Start)
            .await
            .is_err()
        {
            return;
        }

        match self.drive(&goal, trace_id, &sink).await {
            Ok(stats) => {
                tracing::info!(
                    %trace_id,
                    "workflow completed: {}/{} steps successful",
                    stats.successful_steps,
                    stats.total_steps
                );
                sink.emit_terminal(
                    format!(
                        "all steps processed: {}/{} successful",
                        stats.successful_steps, stats.total_steps
                    ),
                    EventPhase::Complete {
                        total_steps: stats.total_steps,
                        successful_steps: stats.successful_steps,
                    },
                )
                .await;
            }
            Err(EngineError::Cancelled) => {
                tracing::debug!(%trace_id, "run cancelled by consumer");
            }
            Err(error) => {
                tracing::error!(%trace_id, "workflow failed: {error}");
                sink.emit_terminal(
                    format!("workflow failed: {error}"),
                    EventPhase::Error {
                        step_id: error.step_id(),
                        kind: error.kind().to_string(),
                        error: error.to_string(),
                    },
                )
                .await;
            }
        }

        self.snapshots.clear_trace(trace_id);
    }

    async fn drive(
        &self,
        goal: &str,
        trace_id: TraceId,
        sink: &EventSink,
    ) -> Result<RunStats, EngineError> {
        // Phase 1: plan
        sink.emit("parsing goal into an execution plan", EventPhase::Progress)
            .await?;
        let mut plan = self.planner.parse(goal).await?;
        plan.trace_id = trace_id;
        if plan.renumber_duplicate_ids() {
            tracing::warn!(%trace_id, "parser emitted duplicate step ids, renumbered 1..N");
        }
        plan.init_dag()?;
        PlanDag::build(&plan)?;

        let summaries: Vec<StepSummary> = plan
            .steps
            .iter()
            .map(|s| StepSummary {
                step_id: s.step_id,
                name: s.name.clone(),
                dependencies: s.dependencies.clone(),
            })
            .collect();
        sink.emit(
            format!("plan decomposed into {} steps", plan.steps.len()),
            EventPhase::Parsing { steps: summaries },
        )
        .await?;

        let mut context = RunContext::seed(goal, trace_id);

        // Phase 2: match
        sink.emit("matching steps to agents", EventPhase::Progress)
            .await?;
        self.matcher.assign(&mut plan).await?;
        let assignments: Vec<Assignment> = plan
            .steps
            .iter()
            .map(|s| Assignment {
                step_id: s.step_id,
                worker: s.assigned_agent.as_ref().map(|a| a.name.clone()),
            })
            .collect();
        sink.emit("agent matching complete", EventPhase::Matching { assignments })
            .await?;

        // Phase 3: wave-driven execution
        self.execute_waves(&mut plan, &mut context, trace_id, sink)
            .await?;

        // Phase 4: final combined review
        if self.config.review.enabled && self.config.review.review_final_only {
            sink.emit("reviewing the combined result", EventPhase::Progress)
                .await?;
            let transcript = final_transcript(&plan);
            let verdict = self.review.review_final(&plan.goal, &transcript).await;
            sink.emit(
                format!(
                    "final review {} (score {:.2})",
                    if verdict.passed { "passed" } else { "failed" },
                    verdict.score
                ),
                EventPhase::FinalReview {
                    review_passed: verdict.passed,
                    review_score: verdict.score,
                    issues: verdict.issues,
                    suggestions: verdict.suggestions,
                },
            )
            .await?;
        }

        // Phase 5: finalize
        let stats = RunStats {
            total_steps: plan.steps.len(),
            successful_steps: plan.successful_steps(),
        };
        self.contexts
            .lock()
            .expect("context store poisoned")
            .insert(trace_id, context);
        Ok(stats)
    }

    async fn execute_waves(
        &self,
        plan: &mut ExecutionPlan,
        context: &mut RunContext,
        trace_id: TraceId,
        sink: &EventSink,
    ) -> Result<(), EngineError> {
        let mut queue: VecDeque<StepId> = plan.ready_steps().into();

        'waves: while !queue.is_empty() {
            let mut wave: Vec<StepId> = queue.drain(..).collect();
            wave.sort();

            let names: Vec<String> = wave
                .iter()
                .filter_map(|id| plan.step(*id).map(|s| s.name.clone()))
                .collect();
            sink.emit(
                format!("executing: {}", names.join(", ")),
                EventPhase::Execution {
                    batch_steps: wave.clone(),
                },
            )
            .await?;

            // Snapshot the pre-execution state of every step in the wave so
            // a later revert can land before any of them ran.
            if self.config.review.enable_rollback {
                for &step_id in &wave {
                    self.create_snapshot(trace_id, step_id, context, plan);
                }
            }

            let mut outcomes: Vec<StepOutcome> = Vec::new();
            for chunk in wave.chunks(self.config.parallel.max_parallel.max(1)) {
                let chunk_outcomes = self
                    .execute_chunk(chunk, plan, context, trace_id, sink)
                    .await?;
                outcomes.extend(chunk_outcomes);
            }

            outcomes.sort_by_key(|o| o.step.step_id);
            for outcome in outcomes {
                let step_id = outcome.step.step_id;
                self.record_retries(trace_id, step_id, outcome.retries);

                match outcome.disposition {
                    Disposition::Success => {
                        let step_name = outcome.step.name.clone();
                        let result = outcome.result;
                        let (review_score, review_passed) = review_fields(&outcome.review);

                        if let Some(step) = plan.step_mut(step_id) {
                            *step = outcome.step;
                        }
                        context.set_step_output(step_id, &result);
                        sink.emit(
                            format!("step {step_id} ({step_name}) complete"),
                            EventPhase::StepComplete {
                                step_id,
                                step_name,
                                result_preview: preview(&result),
                                review_score,
                                review_passed,
                            },
                        )
                        .await?;

                        let successors = plan
                            .step(step_id)
                            .map(|s| s.successors.clone())
                            .unwrap_or_default();
                        for successor in successors {
                            if let Some(step) = plan.step_mut(successor) {
                                step.in_degree = step.in_degree.saturating_sub(1);
                                if step.in_degree == 0 && step.status == StepStatus::Pending {
                                    queue.push_back(successor);
                                }
                            }
                        }
                    }
                    Disposition::Revert(target) => {
                        let step_name = outcome.step.name.clone();
                        let (review_score, review_passed) = review_fields(&outcome.review);
                        let suggestions = outcome
                            .review
                            .as_ref()
                            .map(|v| v.suggestions.clone())
                            .unwrap_or_default();

                        if let Some(step) = plan.step_mut(step_id) {
                            *step = outcome.step;
                        }
                        sink.emit(
                            format!("step {step_id} ({step_name}) failed review"),
                            EventPhase::StepComplete {
                                step_id,
                                step_name,
                                result_preview: preview(&outcome.result),
                                review_score,
                                review_passed,
                            },
                        )
                        .await?;

                        match self.snapshots.rollback_snapshot(trace_id, target) {
                            Some(snapshot) => {
                                self.restore_snapshot(plan, context, &snapshot);
                                if !suggestions.is_empty() {
                                    context.insert(
                                        REVIEW_SUGGESTIONS_KEY,
                                        serde_json::Value::from(suggestions),
                                    );
                                }
                                sink.emit(
                                    format!("reverting to step {target} and re-executing"),
                                    EventPhase::Rollback {
                                        rollback_target: target,
                                    },
                                )
                                .await?;
                                queue = plan.ready_steps().into();
                                // Outcomes of later wave siblings are
                                // discarded; the restored state has them
                                // pending again and they will re-execute.
                                continue 'waves;
                            }
                            None => {
                                tracing::warn!(
                                    %trace_id,
                                    "no snapshot available for step {target}, retrying step {step_id} in place"
                                );
                                if let Some(step) = plan.step_mut(step_id) {
                                    step.status = StepStatus::Pending;
                                    step.result = None;
                                }
                                queue.push_back(step_id);
                            }
                        }
                    }
                    Disposition::Terminal(error) => {
                        if let Some(step) = plan.step_mut(step_id) {
                            *step = outcome.step;
                        }
                        sink.emit(
                            format!("step {step_id} failed: {error}"),
                            EventPhase::Error {
                                step_id: Some(step_id),
                                kind: error.kind().to_string(),
                                error: error.to_string(),
                            },
                        )
                        .await?;
                        // Successors never reach in-degree zero; the rest
                        // of the plan keeps going.
                    }
                }
            }
        }

        Ok(())
    }

    async fn execute_chunk(
        &self,
        chunk: &[StepId],
        plan: &mut ExecutionPlan,
        context: &RunContext,
        trace_id: TraceId,
        sink: &EventSink,
    ) -> Result<Vec<StepOutcome>, EngineError> {
        let mut tasks: JoinSet<StepOutcome> = JoinSet::new();
        for &step_id in chunk {
            let Some(step) = plan.step(step_id).cloned() else {
                continue;
            };
            let task = StepTask {
                step,
                context: context.clone(),
                trace_id,
                executor: self.executor.clone(),
                review: self.review.clone(),
                max_retries: self.config.review.max_retries,
                retries: self.retry_count(trace_id, step_id),
                is_final: plan.is_last_open_step(step_id),
            };
            tasks.spawn(task.run());
        }

        let mut outcomes = Vec::new();
        let mut aborted = false;
        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    match joined {
                        None => break,
                        Some(Ok(outcome)) => {
                            let terminal_failure =
                                matches!(outcome.disposition, Disposition::Terminal(_));
                            outcomes.push(outcome);
                            if terminal_failure
                                && self.config.parallel.fail_strategy == FailStrategy::Abort
                                && !aborted
                            {
                                tracing::warn!(%trace_id, "terminal step failure, aborting wave peers");
                                tasks.abort_all();
                                aborted = true;
                            }
                        }
                        Some(Err(join_error)) => {
                            if !join_error.is_cancelled() {
                                tracing::error!(%trace_id, "step task panicked: {join_error}");
                            }
                        }
                    }
                }
                _ = sink.closed() => {
                    tasks.abort_all();
                    return Err(EngineError::Cancelled);
                }
            }
        }

        if aborted {
            for &step_id in chunk {
                if outcomes.iter().any(|o| o.step.step_id == step_id) {
                    continue;
                }
                if let Some(step) = plan.step_mut(step_id) {
                    step.status = StepStatus::Skipped;
                    step.error = Some("cancelled after sibling failure".to_string());
                }
                sink.emit(
                    format!("step {step_id} skipped after sibling failure"),
                    EventPhase::Progress,
                )
                .await?;
            }
        }

        Ok(outcomes)
    }

    fn create_snapshot(
        &self,
        trace_id: TraceId,
        step_id: StepId,
        context: &RunContext,
        plan: &ExecutionPlan,
    ) {
        let step_states: HashMap<StepId, StepState> = plan
            .steps
            .iter()
            .map(|s| {
                (
                    s.step_id,
                    StepState {
                        status: s.status,
                        result: s.result.clone(),
                        error: s.error.clone(),
                        retry_count: self.retry_count(trace_id, s.step_id),
                        start_time: s.start_time,
                        end_time: s.end_time,
                    },
                )
            })
            .collect();
        let in_degrees: HashMap<StepId, u32> = plan
            .steps
            .iter()
            .map(|s| (s.step_id, s.in_degree))
            .collect();
        self.snapshots
            .create(trace_id, step_id, context, step_states, in_degrees);
    }

    fn restore_snapshot(
        &self,
        plan: &mut ExecutionPlan,
        context: &mut RunContext,
        snapshot: &ExecutionSnapshot,
    ) {
        let (restored_context, step_states, in_degrees) = self.snapshots.restore(snapshot);
        *context = restored_context;
        for step in &mut plan.steps {
            if let Some(state) = step_states.get(&step.step_id) {
                step.status = state.status;
                step.result = state.result.clone();
                step.error = state.error.clone();
                step.start_time = state.start_time;
                step.end_time = state.end_time;
            }
            if let Some(in_degree) = in_degrees.get(&step.step_id) {
                step.in_degree = *in_degree;
            }
        }
    }

    fn record_retries(&self, trace_id: TraceId, step_id: StepId, count: u32) {
        let mut retries = self.retries.lock().expect("retry store poisoned");
        retries
            .entry(trace_id)
            .or_default()
            .insert(step_id, count.min(self.config.review.max_retries));
    }
}

fn review_fields(review: &Option<ReviewVerdict>) -> (Option<f64>, Option<bool>) {
    match review {
        Some(verdict) => (Some(verdict.score), Some(verdict.passed)),
        None => (None, None),
    }
}

/// Markdown transcript of all successful step results, fed to the final
/// review and surfaced through the run context.
fn final_transcript(plan: &ExecutionPlan) -> String {
    let mut sections = Vec::new();
    for step in &plan.steps {
        if step.status != StepStatus::Success {
            continue;
        }
        if let Some(result) = &step.result {
            sections.push(format!(
                "## Step {}: {}\n\n{}\n",
                step.step_id, step.name, result
            ));
        }
    }
    sections.join("\n")
}

struct EventSink {
    trace_id: TraceId,
    tx: mpsc::Sender<WorkflowEvent>,
}

impl EventSink {
    async fn emit(
        &self,
        content: impl Into<String>,
        phase: EventPhase,
    ) -> Result<(), EngineError> {
        self.tx
            .send(WorkflowEvent::new(self.trace_id, content, phase))
            .await
            .map_err(|_| EngineError::Cancelled)
    }

    async fn emit_terminal(&self, content: impl Into<String>, phase: EventPhase) {
        let _ = self
            .tx
            .send(WorkflowEvent::terminal(self.trace_id, content, phase))
            .await;
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Per-step execution task: runs the retry/review state machine against a
/// cloned context and returns its mutations for the scheduler to apply.
struct StepTask {
    step: TaskStep,
    context: RunContext,
    trace_id: TraceId,
    executor: Arc<dyn StepExecutor>,
    review: ReviewGate,
    max_retries: u32,
    retries: u32,
    is_final: bool,
}

struct StepOutcome {
    step: TaskStep,
    result: String,
    review: Option<ReviewVerdict>,
    /// Final retry counter value for this step
    retries: u32,
    disposition: Disposition,
}

enum Disposition {
    Success,
    /// Review demanded a revert to this predecessor
    Revert(StepId),
    /// Permanent failure: escalation or an exhausted retry budget
    Terminal(EngineError),
}

impl StepTask {
    async fn run(mut self) -> StepOutcome {
        let step_id = self.step.step_id;
        let mut last_review: Option<ReviewVerdict> = None;

        while self.retries < self.max_retries {
            let outcome = self
                .executor
                .execute(self.step.clone(), &self.context, self.trace_id)
                .await;
            self.step = outcome.step;
            let result = outcome.result;

            if self.step.status == StepStatus::Failed {
                let consumed = outcome.failed_attempts.max(1);
                self.retries = (self.retries + consumed).min(self.max_retries);
                if self.retries >= self.max_retries {
                    break;
                }
                tracing::warn!(
                    %step_id,
                    "execution failed ({}), retrying {}/{}",
                    self.step.error.as_deref().unwrap_or("unknown error"),
                    self.retries,
                    self.max_retries
                );
                self.step.status = StepStatus::Pending;
                continue;
            }
            self.retries = (self.retries + outcome.failed_attempts).min(self.max_retries);

            if self.review.should_review(step_id, self.is_final) {
                let request = ReviewRequest {
                    step_id,
                    task_description: self.step.description.clone(),
                    result: result.clone(),
                    context: self.context.clone(),
                    dependencies: self.step.dependencies.clone(),
                };
                let verdict = self.review.review_step(&request).await;

                if !verdict.passed {
                    self.retries = (self.retries + 1).min(self.max_retries);
                    if !verdict.suggestions.is_empty() {
                        // Surface the suggestions to the next attempt
                        self.context.insert(
                            REVIEW_SUGGESTIONS_KEY,
                            serde_json::Value::from(verdict.suggestions.clone()),
                        );
                    }

                    match verdict.rollback.as_ref().map(|a| (a.kind, a.target_step_id)) {
                        Some((RollbackKind::Revert, target)) => {
                            return StepOutcome {
                                step: self.step,
                                result,
                                review: Some(verdict),
                                retries: self.retries,
                                disposition: Disposition::Revert(target),
                            };
                        }
                        Some((RollbackKind::Escalate, _)) => {
                            let reason = verdict
                                .rollback
                                .as_ref()
                                .map(|a| a.reason.clone())
                                .unwrap_or_default();
                            self.step.status = StepStatus::Failed;
                            self.step.error = Some(reason.clone());
                            return StepOutcome {
                                step: self.step,
                                result,
                                review: Some(verdict),
                                retries: self.retries,
                                disposition: Disposition::Terminal(
                                    EngineError::HumanInterventionRequired { step_id, reason },
                                ),
                            };
                        }
                        _ => {
                            last_review = Some(verdict);
                            if self.retries >= self.max_retries {
                                break;
                            }
                            tracing::warn!(
                                %step_id,
                                "review failed, retrying {}/{}",
                                self.retries,
                                self.max_retries
                            );
                            self.step.status = StepStatus::Pending;
                            continue;
                        }
                    }
                }
                last_review = Some(verdict);
            }

            return StepOutcome {
                step: self.step,
                result,
                review: last_review,
                retries: self.retries,
                disposition: Disposition::Success,
            };
        }

        self.step.status = StepStatus::Failed;
        self.step.error = Some(format!("exhausted retry budget ({})", self.max_retries));
        StepOutcome {
            step: self.step,
            result: String::new(),
            review: last_review,
            retries: self.retries,
            disposition: Disposition::Terminal(EngineError::RetryExhausted {
                step_id,
                max_retries: self.max_retries,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_report_from_events() {
        let trace_id = TraceId::new();
        let events = vec![
            WorkflowEvent::new(trace_id, "start", EventPhase::Start),
            WorkflowEvent::terminal(
                trace_id,
                "done",
                EventPhase::Complete {
                    total_steps: 3,
                    successful_steps: 2,
                },
            ),
        ];

        let report = RunReport::from_events(events);
        assert_eq!(report.trace_id, trace_id);
        assert_eq!(report.total_steps, 3);
        assert_eq!(report.successful_steps, 2);
        assert!(report.completed);
    }

    #[test]
    fn test_run_report_without_complete_event() {
        let trace_id = TraceId::new();
        let events = vec![WorkflowEvent::terminal(
            trace_id,
            "boom",
            EventPhase::Error {
                step_id: None,
                kind: "cyclic_plan".to_string(),
                error: "plan contains circular dependencies".to_string(),
            },
        )];

        let report = RunReport::from_events(events);
        assert!(!report.completed);
        assert_eq!(report.total_steps, 0);
    }
}
