//! Error taxonomy for the task execution engine.
//!
//! Fatal variants (`StateNotInitialized`, `StepNotFound`) are returned wrapped in
//! `anyhow::Error`; callers use `downcast_ref::<EngineError>()` to classify them.
//! The remaining variants are step-local: their `Display` text becomes the
//! step's recorded error and the on-fail policy decides what happens next.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineError {
    #[error(
        "task state not found for {task_id}; run `coder run --task {task_id}` first to initialize"
    )]
    StateNotInitialized { task_id: String },

    #[error("step {step_id} not found in task {task_id}")]
    StepNotFound { task_id: String, step_id: String },

    #[error("command \"{binary}\" is not in shell allowlist ({})", .allow.join(", "))]
    CommandNotAllowed { binary: String, allow: Vec<String> },

    #[error("patch invalid: {0}")]
    PatchInvalid(String),

    #[error("patch apply failed: {0}")]
    PatchApplyFailed(String),

    #[error("diff generation failed: {0}")]
    GeneratorFailed(String),

    #[error("command timed out after {}s", .0.as_secs())]
    SubprocessTimeout(Duration),

    #[error("command failed: {0}")]
    SubprocessError(String),
}
