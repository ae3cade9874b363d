//! The execution loop: runs a task's steps in order against initialized state.
//!
//! Each step's record is re-read from the state store before it runs, so steps
//! already `success` or `skipped` are bypassed and a rerun picks up where the
//! last one stopped. A step's record is written only after its handler (and
//! any retries) have returned.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::core::policy::{FailureAction, max_fix_cycles, resolve_failure, should_retry};
use crate::core::state_update::union_artifacts;
use crate::core::types::{StepPatch, StepResult, StepStatus};
use crate::error::EngineError;
use crate::handlers::{StepContext, run_step};
use crate::io::artifacts::ArtifactStore;
use crate::io::config::EngineConfig;
use crate::io::event_log::EventLog;
use crate::io::generator::DiffGenerator;
use crate::io::git::Git;
use crate::io::init::CoderPaths;
use crate::io::patch::PatchApplier;
use crate::io::state_store::StateStore;
use crate::io::task_store::load_task;
use crate::task::StepDefinition;

/// Caller-supplied execution flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Run without pausing for approvals.
    pub autonomous: bool,
}

/// How a call to [`execute_task`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Every step is `success` or `skipped`.
    Completed,
    /// A failed step stopped the loop.
    Halted { step_id: String },
}

/// Execute `task_id` until every step is settled or a failure halts the loop.
///
/// Fails with [`EngineError::StateNotInitialized`] if [`crate::start::initialize_run`]
/// has not run for the task. Step failures never surface as `Err`; they are
/// recorded in state and resolved by the step's on-fail policy.
#[instrument(skip_all, fields(task_id = %task_id))]
pub fn execute_task<P: PatchApplier, D: DiffGenerator>(
    paths: &CoderPaths,
    config: &EngineConfig,
    task_id: &str,
    options: &ExecuteOptions,
    patcher: &P,
    generator: &D,
) -> Result<ExecutionOutcome> {
    let task = load_task(paths, task_id)?;
    let store = StateStore::new(&paths.state_dir);
    let initial = store.require(task_id)?;

    let events = EventLog::new(paths.log_path(task_id), task_id);
    let artifacts = ArtifactStore::new(&paths.root);
    let git = Git::new(&paths.root);
    let model = task
        .model
        .as_deref()
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .unwrap_or(config.model.as_str());

    info!(steps = task.steps.len(), branch = %initial.branch, "starting execution");
    events.record(
        "execution-start",
        None,
        json!({
            "steps": task.steps.len(),
            "branch": initial.branch,
            "autonomous": options.autonomous,
        }),
    );

    let mut outcome = ExecutionOutcome::Completed;
    for step in &task.steps {
        let state = store.require(task_id)?;
        let record = state
            .steps
            .get(&step.id)
            .ok_or_else(|| EngineError::StepNotFound {
                task_id: task_id.to_string(),
                step_id: step.id.clone(),
            })?;
        if record.status.is_settled() {
            info!(step_id = %step.id, status = record.status.as_str(), "step already settled; skipping");
            continue;
        }

        store.update_step(
            task_id,
            &step.id,
            StepPatch {
                status: Some(StepStatus::Running),
                started_at: Some(Some(Utc::now())),
                error: Some(None),
                note: Some(None),
                ..StepPatch::default()
            },
        )?;
        events.record(
            "step-start",
            Some(&step.id),
            json!({ "kind": step.kind.as_str(), "goal": step.goal }),
        );
        info!(step_id = %step.id, kind = step.kind.as_str(), goal = %step.goal, "running step");

        let ctx = StepContext {
            paths,
            task: &task,
            step,
            options,
            config,
            git: &git,
            patcher,
            generator,
            artifacts: &artifacts,
            events: &events,
            model,
        };
        let (result, retries, collected) = run_with_retries(&ctx);

        let head = match git.head_commit() {
            Ok(sha) => Some(sha),
            Err(err) => {
                debug!(error = %format!("{err:#}"), "could not read head commit");
                None
            }
        };
        let commit_sha = result.commit_sha.clone().or(head);
        store.update_step(
            task_id,
            &step.id,
            StepPatch {
                status: Some(result.status),
                started_at: None,
                ended_at: Some(Some(Utc::now())),
                error: Some(result.error.clone()),
                note: Some(result.note.clone()),
                retries: Some(retries),
                commit_sha: commit_sha.clone().map(Some),
                artifacts: collected,
            },
        )?;
        events.record(
            "step-complete",
            Some(&step.id),
            json!({
                "status": result.status.as_str(),
                "commit_sha": commit_sha,
                "commit_message": result.commit_message,
                "note": result.note,
                "error": result.error,
                "artifacts": result.artifacts,
            }),
        );

        if result.status != StepStatus::Failed {
            info!(step_id = %step.id, status = result.status.as_str(), note = ?result.note, "step finished");
            continue;
        }

        error!(step_id = %step.id, error = ?result.error, "step failed");
        match resolve_failure(step, result.error.as_deref()) {
            FailureAction::Skip { note } => {
                warn!(step_id = %step.id, "on_fail=skip; marking step skipped");
                store.update_step(
                    task_id,
                    &step.id,
                    StepPatch {
                        status: Some(StepStatus::Skipped),
                        note: Some(Some(note)),
                        ..StepPatch::default()
                    },
                )?;
                events.record(
                    "step-skipped-after-failure",
                    Some(&step.id),
                    json!({ "strategy": "skip" }),
                );
            }
            FailureAction::Halt { note } => {
                if let Some(note) = note {
                    store.update_step(
                        task_id,
                        &step.id,
                        StepPatch {
                            note: Some(Some(note)),
                            ..StepPatch::default()
                        },
                    )?;
                }
                outcome = ExecutionOutcome::Halted {
                    step_id: step.id.clone(),
                };
                break;
            }
        }
    }

    store.touch(task_id)?;
    let halted_at = match &outcome {
        ExecutionOutcome::Completed => None,
        ExecutionOutcome::Halted { step_id } => Some(step_id.as_str()),
    };
    events.record("execution-complete", None, json!({ "halted_at": halted_at }));
    info!(halted_at = ?halted_at, "execution finished");
    Ok(outcome)
}

/// Invoke the step's handler until it stops failing or its retry budget is spent.
///
/// Returns the last result, the number of retries consumed and the union of
/// artifacts produced by every attempt.
fn run_with_retries<P: PatchApplier, D: DiffGenerator>(
    ctx: &StepContext<'_, P, D>,
) -> (StepResult, u32, Vec<String>) {
    let step: &StepDefinition = ctx.step;
    let mut attempt = 0u32;
    let mut collected = Vec::new();
    loop {
        let result = match run_step(ctx) {
            Ok(result) => result,
            Err(err) => {
                warn!(step_id = %step.id, error = %format!("{err:#}"), "step handler errored");
                StepResult::failed(format!("{err:#}"))
            }
        };
        union_artifacts(&mut collected, result.artifacts.iter().cloned());

        if result.status != StepStatus::Failed || !should_retry(step, attempt) {
            return (result, attempt, collected);
        }

        attempt += 1;
        let max_cycles = max_fix_cycles(step);
        warn!(step_id = %step.id, attempt, max_cycles, "retrying failed step (fix_and_retry)");
        ctx.events.record(
            "step-retry",
            Some(&step.id),
            json!({
                "attempt": attempt,
                "max_cycles": max_cycles,
                "error": result.error,
            }),
        );
    }
}
