//! Semantic invariants of task definitions not expressible via JSON Schema.

use std::collections::HashSet;

use crate::task::TaskDefinition;

/// Check semantic invariants not expressible in JSON Schema:
/// - Step ids are non-empty and unique
/// - `depends_on` only names steps of the same task, never the step itself
/// - `policies.max_parallel` is 1
pub fn validate_invariants(task: &TaskDefinition) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    if task.steps.is_empty() {
        errors.push(format!("task {}: must declare at least one step", task.id));
    }

    for step in &task.steps {
        if step.id.trim().is_empty() {
            errors.push("step id must be non-empty".to_string());
        }
        if !seen.insert(step.id.as_str()) {
            errors.push(format!("duplicate step id '{}'", step.id));
        }
    }

    for step in &task.steps {
        for dep in &step.depends_on {
            if dep == &step.id {
                errors.push(format!("step '{}': depends on itself", step.id));
            } else if !seen.contains(dep.as_str()) {
                errors.push(format!("step '{}': depends on unknown step '{}'", step.id, dep));
            }
        }
    }

    if task.policies.max_parallel != 1 {
        errors.push(format!(
            "policies.max_parallel must be 1 (got {})",
            task.policies.max_parallel
        ));
    }

    errors
}

/// Dependencies that point at a step declared later in the sequence.
///
/// Execution is strictly in declared order, so these are reported as warnings.
pub fn forward_dependencies(task: &TaskDefinition) -> Vec<(String, String)> {
    let mut declared = HashSet::new();
    let mut forward = Vec::new();
    for step in &task.steps {
        for dep in &step.depends_on {
            if !declared.contains(dep.as_str()) && dep != &step.id {
                forward.push((step.id.clone(), dep.clone()));
            }
        }
        declared.insert(step.id.as_str());
    }
    forward
}
