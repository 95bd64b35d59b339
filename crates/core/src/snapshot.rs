use crate::types::{RunContext, StepId, StepStatus, TraceId};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

/// Runtime state of one step as captured in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct StepState {
    pub status: StepStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Deep copy of orchestration state, taken right before `step_id` was
/// dispatched. Restoring one rewinds the run to that point.
#[derive(Debug, Clone)]
pub struct ExecutionSnapshot {
    pub snapshot_id: Uuid,
    pub trace_id: TraceId,
    /// The step about to execute when this snapshot was taken
    pub step_id: StepId,
    pub created_at: DateTime<Utc>,
    pub context: RunContext,
    pub step_states: HashMap<StepId, StepState>,
    pub in_degrees: HashMap<StepId, u32>,
}

impl ExecutionSnapshot {
    pub fn completed_steps(&self) -> Vec<StepId> {
        let mut completed: Vec<StepId> = self
            .step_states
            .iter()
            .filter(|(_, state)| state.status == StepStatus::Success)
            .map(|(id, _)| *id)
            .collect();
        completed.sort();
        completed
    }

    pub fn pending_steps(&self) -> Vec<StepId> {
        let mut pending: Vec<StepId> = self
            .step_states
            .iter()
            .filter(|(_, state)| state.status == StepStatus::Pending)
            .map(|(id, _)| *id)
            .collect();
        pending.sort();
        pending
    }

    pub fn is_pending(&self, id: StepId) -> bool {
        self.step_states
            .get(&id)
            .map(|state| state.status == StepStatus::Pending)
            .unwrap_or(false)
    }
}

/// In-memory store of per-trace snapshot sequences.
///
/// Snapshots are appended in creation order and evicted oldest-first once a
/// trace exceeds its bound. All state lives behind one mutex; operations
/// clone in and out, so a restored snapshot can never be mutated
/// retroactively by the live run.
pub struct SnapshotManager {
    max_per_trace: usize,
    traces: Mutex<HashMap<TraceId, VecDeque<ExecutionSnapshot>>>,
}

impl SnapshotManager {
    pub fn new(max_per_trace: usize) -> Self {
        Self {
            max_per_trace: max_per_trace.max(1),
            traces: Mutex::new(HashMap::new()),
        }
    }

    /// Record a snapshot of the state right before `step_id` executes.
    pub fn create(
        &self,
        trace_id: TraceId,
        step_id: StepId,
        context: &RunContext,
        step_states: HashMap<StepId, StepState>,
        in_degrees: HashMap<StepId, u32>,
    ) -> Uuid {
        let snapshot = ExecutionSnapshot {
            snapshot_id: Uuid::new_v4(),
            trace_id,
            step_id,
            created_at: Utc::now(),
            context: context.clone(),
            step_states,
            in_degrees,
        };
        let snapshot_id = snapshot.snapshot_id;

        let mut traces = self.traces.lock().expect("snapshot store poisoned");
        let log = traces.entry(trace_id).or_default();
        if log.len() >= self.max_per_trace {
            if let Some(evicted) = log.pop_front() {
                tracing::debug!(
                    trace_id = %trace_id,
                    snapshot_id = %evicted.snapshot_id,
                    "evicted oldest snapshot"
                );
            }
        }
        log.push_back(snapshot);
        snapshot_id
    }

    /// Most recent snapshot for a trace.
    pub fn latest(&self, trace_id: TraceId) -> Option<ExecutionSnapshot> {
        let traces = self.traces.lock().expect("snapshot store poisoned");
        traces.get(&trace_id).and_then(|log| log.back()).cloned()
    }

    /// Snapshot suitable for reverting to `target`: the most recent one in
    /// which the target is still pending, falling back to the most recent
    /// one in which it has not completed.
    pub fn rollback_snapshot(
        &self,
        trace_id: TraceId,
        target: StepId,
    ) -> Option<ExecutionSnapshot> {
        let traces = self.traces.lock().expect("snapshot store poisoned");
        let log = traces.get(&trace_id)?;

        if let Some(snapshot) = log.iter().rev().find(|s| s.is_pending(target)) {
            return Some(snapshot.clone());
        }
        log.iter()
            .rev()
            .find(|s| !s.completed_steps().contains(&target))
            .cloned()
    }

    /// Fresh deep copies of the snapshot's state, ready to be installed as
    /// the live state. Restoring twice yields equal state both times.
    pub fn restore(
        &self,
        snapshot: &ExecutionSnapshot,
    ) -> (RunContext, HashMap<StepId, StepState>, HashMap<StepId, u32>) {
        (
            snapshot.context.clone(),
            snapshot.step_states.clone(),
            snapshot.in_degrees.clone(),
        )
    }

    /// Drop all snapshots of a finished run.
    pub fn clear_trace(&self, trace_id: TraceId) {
        let mut traces = self.traces.lock().expect("snapshot store poisoned");
        traces.remove(&trace_id);
    }

    pub fn snapshot_count(&self, trace_id: TraceId) -> usize {
        let traces = self.traces.lock().expect("snapshot store poisoned");
        traces.get(&trace_id).map(|log| log.len()).unwrap_or(0)
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new(50)
    }
}
