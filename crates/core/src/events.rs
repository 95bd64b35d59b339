use crate::types::{StepId, TraceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of the result preview carried on step-complete events.
pub const RESULT_PREVIEW_CHARS: usize = 150;

/// One event on a run's output stream.
///
/// Events for a trace are emitted in execution order; `is_complete` marks
/// the terminal event of the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub trace_id: TraceId,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub is_complete: bool,
    #[serde(flatten)]
    pub phase: EventPhase,
}

impl WorkflowEvent {
    pub fn new(trace_id: TraceId, content: impl Into<String>, phase: EventPhase) -> Self {
        Self {
            trace_id,
            timestamp: Utc::now(),
            content: content.into(),
            is_complete: false,
            phase,
        }
    }

    pub fn terminal(trace_id: TraceId, content: impl Into<String>, phase: EventPhase) -> Self {
        Self {
            is_complete: true,
            ..Self::new(trace_id, content, phase)
        }
    }
}

/// Phase-specific payload of a workflow event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum EventPhase {
    Start,
    /// Narration between the structured phases
    Progress,
    Parsing {
        steps: Vec<StepSummary>,
    },
    Matching {
        assignments: Vec<Assignment>,
    },
    Execution {
        batch_steps: Vec<StepId>,
    },
    StepComplete {
        step_id: StepId,
        step_name: String,
        result_preview: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        review_score: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        review_passed: Option<bool>,
    },
    Rollback {
        rollback_target: StepId,
    },
    FinalReview {
        review_passed: bool,
        review_score: f64,
        issues: Vec<String>,
        suggestions: Vec<String>,
    },
    Complete {
        total_steps: usize,
        successful_steps: usize,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        step_id: Option<StepId>,
        kind: String,
        error: String,
    },
}

/// Per-step metadata on parsing events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub step_id: StepId,
    pub name: String,
    pub dependencies: Vec<StepId>,
}

/// Step-to-worker binding on matching events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub step_id: StepId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

/// Truncate a result for event payloads, respecting char boundaries.
pub fn preview(text: &str) -> String {
    let mut truncated: String = text.chars().take(RESULT_PREVIEW_CHARS).collect();
    if truncated.len() < text.len() {
        truncated.push_str("...");
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_short_text_unchanged() {
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "x".repeat(400);
        let preview = preview(&long);
        assert_eq!(preview.chars().count(), RESULT_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let long = "日".repeat(200);
        let preview = preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), RESULT_PREVIEW_CHARS + 3);
    }

    #[test]
    fn test_event_serializes_with_phase_tag() {
        let event = WorkflowEvent::new(
            TraceId::new(),
            "step 1 (A) complete",
            EventPhase::StepComplete {
                step_id: StepId(1),
                step_name: "A".to_string(),
                result_preview: "alpha".to_string(),
                review_score: None,
                review_passed: None,
            },
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["phase"], "step_complete");
        assert_eq!(value["step_id"], 1);
        assert!(value.get("review_score").is_none());
        assert_eq!(value["is_complete"], false);
    }

    #[test]
    fn test_terminal_event_is_complete() {
        let event = WorkflowEvent::terminal(
            TraceId::new(),
            "done",
            EventPhase::Complete {
                total_steps: 2,
                successful_steps: 2,
            },
        );
        assert!(event.is_complete);
    }
}
