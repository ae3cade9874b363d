//! Task definition model (`.coder/tasks/<task-id>.json`).
//!
//! Task definitions are produced by planning and are read-only to the engine.

use serde::{Deserialize, Serialize};

/// One planned unit of work: an ordered list of steps against a single branch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDefinition {
    pub id: String,
    pub title: String,
    /// Branch the steps commit to.
    pub branch: String,
    /// Branch the task branch is cut from.
    pub base: String,
    /// Model identifier for diff generation. Falls back to the configured model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub policies: TaskPolicies,
    #[serde(default)]
    pub success: SuccessCriteria,
    /// Steps in execution order.
    pub steps: Vec<StepDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TaskMetadata>,
}

impl TaskDefinition {
    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.id.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    #[default]
    Manual,
    None,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskPolicies {
    pub approvals: ApprovalMode,
    pub retries: u32,
    /// Steps always run one at a time; only `1` is accepted.
    pub max_parallel: u32,
    pub run_tests_after_each_step: bool,
    pub allow_network: bool,
}

impl Default for TaskPolicies {
    fn default() -> Self {
        Self {
            approvals: ApprovalMode::Manual,
            retries: 0,
            max_parallel: 1,
            run_tests_after_each_step: false,
            allow_network: false,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SuccessCriteria {
    pub require_green_tests: bool,
    pub require_no_lint_errors: bool,
    pub required_files: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskMetadata {
    /// Path (relative to the repository root) of the spec the task was planned from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_label: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub change_hints: Vec<String>,
}

/// Kind tag selecting the step handler.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Analyze,
    Edit,
    Shell,
    Test,
    Doc,
    Custom,
    /// Kinds written by a newer planner. Routed to the custom placeholder.
    #[serde(other)]
    Unknown,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Analyze => "analyze",
            StepKind::Edit => "edit",
            StepKind::Shell => "shell",
            StepKind::Test => "test",
            StepKind::Doc => "doc",
            StepKind::Custom => "custom",
            StepKind::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepDefinition {
    pub id: String,
    pub kind: StepKind,
    pub goal: String,
    /// Declared ordering hints. Execution is strictly in `steps` order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    /// Working directory relative to the repository root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FileChange>,
    /// Inline unified diff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    /// Path (relative to the repository root) of a unified diff file.
    #[serde(default, alias = "diffPath", skip_serializing_if = "Option::is_none")]
    pub diff_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_fail: Option<OnFail>,
}

impl StepDefinition {
    pub fn strategy(&self) -> Option<OnFailStrategy> {
        self.on_fail.as_ref().and_then(|on_fail| on_fail.strategy)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ChangeMode>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeMode {
    Create,
    Patch,
    Delete,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnFail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<OnFailStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u32>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnFailStrategy {
    Skip,
    FixAndRetry,
    RevertAndStop,
}

impl OnFailStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            OnFailStrategy::Skip => "skip",
            OnFailStrategy::FixAndRetry => "fix_and_retry",
            OnFailStrategy::RevertAndStop => "revert_and_stop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_step_kind_deserializes_to_fallback() {
        let step: StepDefinition =
            serde_json::from_str(r#"{"id":"s1","kind":"deploy","goal":"ship it"}"#)
                .expect("parse");
        assert_eq!(step.kind, StepKind::Unknown);
    }

    #[test]
    fn minimal_task_fills_policy_defaults() {
        let raw = r#"{
            "id": "T-1",
            "title": "t",
            "branch": "agent/t",
            "base": "main",
            "steps": [{"id": "a", "kind": "analyze", "goal": "look"}]
        }"#;
        let task: TaskDefinition = serde_json::from_str(raw).expect("parse");
        assert_eq!(task.policies.max_parallel, 1);
        assert_eq!(task.policies.approvals, ApprovalMode::Manual);
        assert_eq!(task.step_ids().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn on_fail_strategy_uses_snake_case() {
        let on_fail: OnFail =
            serde_json::from_str(r#"{"strategy":"fix_and_retry","max_cycles":2}"#).expect("parse");
        assert_eq!(on_fail.strategy, Some(OnFailStrategy::FixAndRetry));
        assert_eq!(on_fail.max_cycles, Some(2));
    }
}
