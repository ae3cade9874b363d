use anyhow::Result;

use crate::core::types::StepResult;
use crate::handlers::StepContext;

pub(super) fn run<P, D>(ctx: &StepContext<'_, P, D>) -> Result<StepResult> {
    let artifact = ctx.write_artifact("analysis-summary", &summarize(ctx))?;
    Ok(StepResult::success("Recorded analysis summary artifact.").with_artifacts(vec![artifact]))
}

fn summarize<P, D>(ctx: &StepContext<'_, P, D>) -> String {
    let task = ctx.task;
    let mut lines = vec![
        format!("Task ID: {}", task.id),
        format!("Title: {}", task.title),
        format!("Branch: {} (base {})", task.branch, task.base),
        format!("Model: {}", ctx.model),
        format!(
            "Mode: {}",
            if ctx.options.autonomous { "autonomous" } else { "supervised" }
        ),
    ];
    if let Some(metadata) = &task.metadata {
        if let Some(snapshot) = &metadata.spec_snapshot {
            lines.push(format!("Spec snapshot: {snapshot}"));
        }
        if let Some(length) = metadata.spec_length {
            lines.push(format!("Spec length: {length} chars"));
        }
    }
    lines.push("Planned steps:".to_string());
    for (idx, step) in task.steps.iter().enumerate() {
        lines.push(format!(
            "  {}. [{}] {} -> {}",
            idx + 1,
            step.kind.as_str(),
            step.id,
            step.goal
        ));
    }
    lines.join("\n")
}
