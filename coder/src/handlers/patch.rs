//! `edit` and `doc` handlers: acquire a diff, validate it, apply it, commit.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::core::diff::{INVALID_DIFF_REASON, is_unified_diff, regeneration_goal};
use crate::core::sanitize::sanitize_commit_message;
use crate::core::types::StepResult;
use crate::error::EngineError;
use crate::handlers::StepContext;
use crate::io::file_context::{FileSnippet, load_file_context};
use crate::io::generator::{DiffGenerator, DiffRequest, GeneratedDiff, GeneratorError};
use crate::io::git::ApplyMode;
use crate::io::patch::PatchApplier;

/// Runtime files under `.coder/` are never part of a step commit.
const CODER_DIR: &str = ".coder/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PatchKind {
    Edit,
    Doc,
}

impl PatchKind {
    fn default_commit_action(self) -> &'static str {
        match self {
            PatchKind::Edit => "apply edits",
            PatchKind::Doc => "update docs",
        }
    }
}

/// Where the diff being applied came from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DiffSource {
    Inline,
    File(String),
    Generated,
}

impl DiffSource {
    fn describe(&self) -> String {
        match self {
            DiffSource::Inline => "inline-step-diff".to_string(),
            DiffSource::File(path) => path.clone(),
            DiffSource::Generated => "generated".to_string(),
        }
    }
}

struct Candidate {
    diff: String,
    source: DiffSource,
}

/// Generation inputs that stay fixed across the initial request and the retry.
struct GenerationInputs {
    spec_text: Option<String>,
    change_hints: Vec<String>,
    files: Vec<FileSnippet>,
}

pub(super) fn run<P: PatchApplier, D: DiffGenerator>(
    ctx: &StepContext<'_, P, D>,
    kind: PatchKind,
) -> Result<StepResult> {
    let mut artifacts = Vec::new();
    let mut commit_override: Option<String> = None;
    let inputs = generation_inputs(ctx);

    let mut candidate = match resolve_existing_diff(ctx)? {
        Some(found) => found,
        None => match generate(ctx, &inputs, &ctx.step.goal, &mut artifacts)? {
            Ok(generated) => {
                commit_override = generated.commit_message;
                Candidate {
                    diff: generated.diff,
                    source: DiffSource::Generated,
                }
            }
            Err(err) => {
                return Ok(StepResult::failed(
                    EngineError::GeneratorFailed(err.to_string()).to_string(),
                )
                .with_artifacts(artifacts));
            }
        },
    };

    if !is_unified_diff(&candidate.diff) {
        warn!(step_id = %ctx.step.id, source = %candidate.source.describe(), "diff failed validation; regenerating once");
        artifacts.push(ctx.write_artifact("invalid-diff", &candidate.diff)?);
        let goal = regeneration_goal(&ctx.step.goal);
        match generate(ctx, &inputs, &goal, &mut artifacts)? {
            Ok(generated) if is_unified_diff(&generated.diff) => {
                commit_override = generated.commit_message;
                candidate = Candidate {
                    diff: generated.diff,
                    source: DiffSource::Generated,
                };
            }
            Ok(generated) => {
                artifacts.push(ctx.write_artifact("invalid-diff", &generated.diff)?);
                return Ok(StepResult::failed(
                    EngineError::PatchInvalid(INVALID_DIFF_REASON.to_string()).to_string(),
                )
                .with_artifacts(artifacts));
            }
            Err(err) => {
                return Ok(StepResult::failed(
                    EngineError::GeneratorFailed(err.to_string()).to_string(),
                )
                .with_artifacts(artifacts));
            }
        }
    }

    ctx.events.record(
        "apply-diff",
        Some(&ctx.step.id),
        json!({ "source": candidate.source.describe() }),
    );
    let outcome = ctx.patcher.apply(&candidate.diff);
    artifacts.push(ctx.write_artifact("diff", &candidate.diff)?);
    if !outcome.ok {
        if !outcome.stdout.is_empty() {
            artifacts.push(ctx.write_artifact("patch-stdout", &outcome.stdout)?);
        }
        if !outcome.stderr.is_empty() {
            artifacts.push(ctx.write_artifact("patch-stderr", &outcome.stderr)?);
        }
        let message = outcome
            .error
            .unwrap_or_else(|| "Failed to apply diff.".to_string());
        return Ok(
            StepResult::failed(EngineError::PatchApplyFailed(message).to_string())
                .with_artifacts(artifacts),
        );
    }

    let commit_sha = match commit_changes(ctx, kind, commit_override.as_deref()) {
        Ok(sha) => sha,
        Err(err) => {
            warn!(step_id = %ctx.step.id, error = %format!("{err:#}"), "commit failed; reverting applied diff");
            revert_applied(ctx, &candidate.diff);
            return Ok(StepResult::failed(format!("commit failed: {err:#}")).with_artifacts(artifacts));
        }
    };
    let note = match &commit_sha {
        Some(sha) => format!("Applied diff and committed {sha}"),
        None => "Applied diff (no changes staged).".to_string(),
    };
    let mut result = StepResult::success(note).with_artifacts(artifacts);
    result.commit_message = commit_override;
    result.commit_sha = commit_sha;
    Ok(result)
}

/// Inline diff, then `diff_path`, then `.coder/patches/<task>/<step>.diff`.
fn resolve_existing_diff<P, D>(ctx: &StepContext<'_, P, D>) -> Result<Option<Candidate>> {
    if let Some(diff) = ctx.step.diff.as_deref().filter(|d| !d.is_empty()) {
        return Ok(Some(Candidate {
            diff: diff.to_string(),
            source: DiffSource::Inline,
        }));
    }
    if let Some(path) = ctx.step.diff_path.as_deref().filter(|p| !p.trim().is_empty()) {
        let resolved = ctx.root().join(path.trim());
        if resolved.is_file() {
            return read_candidate(&resolved).map(Some);
        }
        debug!(path = %resolved.display(), "referenced diff missing; trying fallback location");
    }
    let fallback = ctx.paths.fallback_patch_path(&ctx.task.id, &ctx.step.id);
    if fallback.is_file() {
        return read_candidate(&fallback).map(Some);
    }
    Ok(None)
}

fn read_candidate(path: &Path) -> Result<Candidate> {
    let diff = fs::read_to_string(path).with_context(|| format!("read diff {}", path.display()))?;
    Ok(Candidate {
        diff,
        source: DiffSource::File(path.display().to_string()),
    })
}

fn generation_inputs<P, D>(ctx: &StepContext<'_, P, D>) -> GenerationInputs {
    let change_hints: Vec<String> = ctx
        .step
        .changes
        .iter()
        .map(|change| change.path.clone())
        .collect();
    let files = load_file_context(
        ctx.root(),
        change_hints.iter().map(String::as_str),
        ctx.config.context.max_snippet_chars,
    );
    GenerationInputs {
        spec_text: read_spec_snapshot(ctx),
        change_hints,
        files,
    }
}

fn read_spec_snapshot<P, D>(ctx: &StepContext<'_, P, D>) -> Option<String> {
    let snapshot = ctx.task.metadata.as_ref()?.spec_snapshot.as_deref()?;
    let path = ctx.root().join(snapshot);
    match fs::read_to_string(&path) {
        Ok(text) => Some(text),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "spec snapshot unreadable; generating without it");
            None
        }
    }
}

/// Ask the generator for a diff and record the exchange as artifacts.
///
/// The outer `Result` fails only when an artifact cannot be written.
fn generate<P, D: DiffGenerator>(
    ctx: &StepContext<'_, P, D>,
    inputs: &GenerationInputs,
    goal: &str,
    artifacts: &mut Vec<String>,
) -> Result<Result<GeneratedDiff, GeneratorError>> {
    let request = DiffRequest {
        model: ctx.model.to_string(),
        task_id: ctx.task.id.clone(),
        step_id: ctx.step.id.clone(),
        goal: goal.to_string(),
        spec_text: inputs.spec_text.clone(),
        change_hints: inputs.change_hints.clone(),
        files: inputs.files.clone(),
    };
    info!(step_id = %ctx.step.id, model = ctx.model, "requesting generated diff");
    match ctx.generator.generate(&request) {
        Ok(generated) => {
            artifacts.push(ctx.write_artifact("generator-prompt", &generated.prompt)?);
            artifacts.push(ctx.write_artifact("generator-response", &generated.raw_response)?);
            artifacts.push(ctx.write_artifact("generator-diff", &generated.diff)?);
            Ok(Ok(generated))
        }
        Err(err) => {
            warn!(step_id = %ctx.step.id, error = %err, "diff generation failed");
            if let Some(raw) = err.raw_response() {
                artifacts.push(ctx.write_artifact("generator-response", raw)?);
            }
            artifacts.push(ctx.write_artifact("generator-failure", &err.to_string())?);
            Ok(Err(err))
        }
    }
}

/// Best-effort undo of an applied diff so a retry starts from the same tree.
fn revert_applied<P, D>(ctx: &StepContext<'_, P, D>, diff: &str) {
    match ctx
        .git
        .apply(diff, ApplyMode::Reverse, ctx.config.apply_timeout())
    {
        Ok(out) if out.ok => debug!(step_id = %ctx.step.id, "applied diff reverted"),
        Ok(out) => warn!(step_id = %ctx.step.id, stderr = %out.stderr.trim(), "could not revert applied diff"),
        Err(err) => warn!(step_id = %ctx.step.id, error = %format!("{err:#}"), "could not revert applied diff"),
    }
}

fn commit_changes<P, D>(
    ctx: &StepContext<'_, P, D>,
    kind: PatchKind,
    suggested: Option<&str>,
) -> Result<Option<String>> {
    if !ctx.git.has_changes_except_prefixes(&[CODER_DIR])? {
        debug!(step_id = %ctx.step.id, "no working tree changes after apply");
        return Ok(None);
    }
    ctx.git.add_all_except(&[CODER_DIR])?;
    let fallback = format!("task({}): {}", ctx.step.id, kind.default_commit_action());
    let message = match suggested.map(str::trim) {
        Some(text) if !text.is_empty() => sanitize_commit_message(text),
        _ => sanitize_commit_message(&fallback),
    };
    let sha = ctx.git.commit_staged(&message)?;
    if let Some(sha) = &sha {
        info!(step_id = %ctx.step.id, commit = %sha, "committed step changes");
    }
    Ok(sha)
}
