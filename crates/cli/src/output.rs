use anyhow::{Context, Result};
use baton_core::events::StepSummary;
use baton_core::{RunContext, TraceId};
use std::path::{Path, PathBuf};

/// Render the successful step outputs as one markdown document and save it
/// under the output directory. Returns the written path, or None when no
/// step produced output.
pub fn save_result(
    goal: &str,
    steps: &[StepSummary],
    context: &RunContext,
    trace_id: TraceId,
    output_dir: &Path,
) -> Result<Option<PathBuf>> {
    let mut sections = Vec::new();
    for summary in steps {
        let key = RunContext::step_output_key(summary.step_id);
        if let Some(result) = context.get(&key).and_then(|value| value.as_str()) {
            sections.push(format!(
                "## Step {}: {}\n\n{}\n",
                summary.step_id, summary.name, result
            ));
        }
    }
    if sections.is_empty() {
        return Ok(None);
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let path = output_dir.join(format!("{}_{}.md", sanitize_goal(goal), trace_id.short()));
    let mut document = format!(
        "# Task: {goal}\n\nTrace ID: {trace_id}\nDate: {}\n\n---\n\n",
        chrono::Utc::now().to_rfc3339()
    );
    document.push_str(&sections.join("\n"));

    std::fs::write(&path, document)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(Some(path))
}

/// Filesystem-safe slug of the goal: alphanumerics, spaces, dashes and
/// underscores only, spaces collapsed to underscores, capped at 50 chars.
fn sanitize_goal(goal: &str) -> String {
    let kept: String = goal
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect();
    let slug: String = kept.trim().replace(' ', "_").chars().take(50).collect();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}
