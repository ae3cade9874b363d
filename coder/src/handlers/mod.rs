//! Step handlers, one per step kind.
//!
//! Handlers return `Ok(StepResult)` for every outcome they understand,
//! including failures. An `Err` means something unexpected went wrong (an
//! artifact could not be written, git refused to commit); the execution loop
//! records it as a failed attempt.

mod analyze;
mod command;
mod patch;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::core::types::StepResult;
use crate::execute::ExecuteOptions;
use crate::io::artifacts::ArtifactStore;
use crate::io::config::EngineConfig;
use crate::io::event_log::EventLog;
use crate::io::generator::DiffGenerator;
use crate::io::git::Git;
use crate::io::init::CoderPaths;
use crate::io::patch::PatchApplier;
use crate::task::{StepDefinition, StepKind, TaskDefinition};

const CUSTOM_PLACEHOLDER_NOTE: &str = "Custom step placeholder. Define bespoke handler.";

/// Everything a handler may consult or act through for one step attempt.
pub struct StepContext<'a, P, D> {
    pub paths: &'a CoderPaths,
    pub task: &'a TaskDefinition,
    pub step: &'a StepDefinition,
    pub options: &'a ExecuteOptions,
    pub config: &'a EngineConfig,
    pub git: &'a Git,
    pub patcher: &'a P,
    pub generator: &'a D,
    pub artifacts: &'a ArtifactStore,
    pub events: &'a EventLog,
    /// Task model, or the configured default.
    pub model: &'a str,
}

impl<P, D> StepContext<'_, P, D> {
    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Step working directory, resolved against the repository root.
    pub fn working_dir(&self) -> PathBuf {
        match self.step.cwd.as_deref().map(str::trim) {
            Some(cwd) if !cwd.is_empty() => self.root().join(cwd),
            _ => self.root().to_path_buf(),
        }
    }

    /// Persist an artifact for the current step and return its reference.
    pub fn write_artifact(&self, label: &str, contents: &str) -> Result<String> {
        self.artifacts
            .write(&self.task.id, &self.step.id, label, contents)
    }
}

/// Run the handler for the step's kind once.
pub fn run_step<P: PatchApplier, D: DiffGenerator>(ctx: &StepContext<'_, P, D>) -> Result<StepResult> {
    debug!(step_id = %ctx.step.id, kind = ctx.step.kind.as_str(), "dispatching step");
    match ctx.step.kind {
        StepKind::Analyze => analyze::run(ctx),
        StepKind::Shell => command::run_shell(ctx),
        StepKind::Test => command::run_tests(ctx),
        StepKind::Edit => patch::run(ctx, patch::PatchKind::Edit),
        StepKind::Doc => patch::run(ctx, patch::PatchKind::Doc),
        StepKind::Custom | StepKind::Unknown => Ok(StepResult::success(CUSTOM_PLACEHOLDER_NOTE)),
    }
}
