//! Merge rules for step state records.

use crate::core::types::{StepPatch, StepState};

/// Merge `patch` into `record`.
///
/// Scalar fields are overwritten when present in the patch. Artifacts are the
/// union of both lists: existing order is kept, new references are appended,
/// empty references and duplicates are dropped.
pub fn apply_step_patch(record: &mut StepState, patch: StepPatch) {
    if let Some(status) = patch.status {
        record.status = status;
    }
    if let Some(started_at) = patch.started_at {
        record.started_at = started_at;
    }
    if let Some(ended_at) = patch.ended_at {
        record.ended_at = ended_at;
    }
    if let Some(error) = patch.error {
        record.error = error;
    }
    if let Some(note) = patch.note {
        record.note = note;
    }
    if let Some(retries) = patch.retries {
        record.retries = retries;
    }
    if let Some(commit_sha) = patch.commit_sha {
        record.commit_sha = commit_sha;
    }
    union_artifacts(&mut record.artifacts, patch.artifacts);
}

/// Append every non-empty reference from `incoming` not already in `existing`.
pub fn union_artifacts(existing: &mut Vec<String>, incoming: impl IntoIterator<Item = String>) {
    for artifact in incoming {
        if artifact.is_empty() || existing.contains(&artifact) {
            continue;
        }
        existing.push(artifact);
    }
}
