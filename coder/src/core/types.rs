//! Shared deterministic types for task execution state.
//!
//! These types are the persisted contract of `.coder/state/<task-id>.json` and
//! the values exchanged between handlers and the execution loop.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Steps in these states are bypassed on resume.
    pub fn is_settled(self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Skipped)
    }
}

/// Persisted record for one step, keyed by step id in [`TaskState::steps`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    /// Artifact references, deduplicated.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl StepState {
    pub fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            note: None,
            retries: 0,
            commit_sha: None,
            artifacts: Vec::new(),
        }
    }
}

/// Persisted execution state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub id: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub steps: BTreeMap<String, StepState>,
}

impl TaskState {
    /// Fresh state with every step `pending`.
    pub fn new<'a>(
        id: &str,
        branch: &str,
        base_commit: Option<String>,
        step_ids: impl IntoIterator<Item = &'a str>,
        now: DateTime<Utc>,
    ) -> Self {
        let steps = step_ids
            .into_iter()
            .map(|step_id| (step_id.to_string(), StepState::pending()))
            .collect();
        Self {
            id: id.to_string(),
            branch: branch.to_string(),
            base_commit,
            updated_at: now,
            steps,
        }
    }
}

/// Partial update for a [`StepState`].
///
/// `None` leaves a field untouched. Double options distinguish "leave as is"
/// (`None`) from "clear" (`Some(None)`). Artifacts are always unioned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepPatch {
    pub status: Option<StepStatus>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub ended_at: Option<Option<DateTime<Utc>>>,
    pub error: Option<Option<String>>,
    pub note: Option<Option<String>>,
    pub retries: Option<u32>,
    pub commit_sha: Option<Option<String>>,
    pub artifacts: Vec<String>,
}

/// Outcome produced by a step handler for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub status: StepStatus,
    pub note: Option<String>,
    pub error: Option<String>,
    pub artifacts: Vec<String>,
    pub commit_message: Option<String>,
    pub commit_sha: Option<String>,
}

impl StepResult {
    pub fn success(note: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Success,
            note: Some(note.into()),
            error: None,
            artifacts: Vec::new(),
            commit_message: None,
            commit_sha: None,
        }
    }

    pub fn skipped(note: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            ..Self::success(note)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            note: None,
            error: Some(error.into()),
            artifacts: Vec::new(),
            commit_message: None,
            commit_sha: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }
}
