//! Patch application gateway.
//!
//! The [`PatchApplier`] trait decouples edit/doc steps from version control.
//! Tests use scripted appliers that accept or reject without touching git.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::io::git::{ApplyMode, Git};

/// Structured outcome of applying a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    /// Most specific failure description available (set when `ok` is false).
    pub error: Option<String>,
}

impl PatchOutcome {
    pub fn applied(stdout: String, stderr: String) -> Self {
        Self {
            ok: true,
            stdout,
            stderr,
            error: None,
        }
    }

    pub fn rejected(stdout: String, stderr: String, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            stdout,
            stderr,
            error: Some(error.into()),
        }
    }
}

/// Applies a validated unified diff to the working tree.
pub trait PatchApplier {
    fn apply(&self, diff: &str) -> PatchOutcome;
}

/// Applier backed by `git apply`: a `--check` dry run, then `--index`.
#[derive(Debug, Clone)]
pub struct GitPatchApplier {
    git: Git,
    timeout: Duration,
}

impl GitPatchApplier {
    pub fn new(git: Git, timeout: Duration) -> Self {
        Self { git, timeout }
    }
}

impl PatchApplier for GitPatchApplier {
    #[instrument(skip_all, fields(diff_bytes = diff.len()))]
    fn apply(&self, diff: &str) -> PatchOutcome {
        let check = match self.git.apply(diff, ApplyMode::Check, self.timeout) {
            Ok(out) => out,
            Err(err) => {
                return PatchOutcome::rejected(String::new(), String::new(), format!("{err:#}"));
            }
        };
        if !check.ok {
            warn!("patch failed dry-run check");
            let error = first_line_or(&check.stderr, "Patch failed dry-run check.");
            return PatchOutcome::rejected(check.stdout, check.stderr, error);
        }

        let apply = match self.git.apply(diff, ApplyMode::Index, self.timeout) {
            Ok(out) => out,
            Err(err) => {
                return PatchOutcome::rejected(String::new(), String::new(), format!("{err:#}"));
            }
        };
        if !apply.ok {
            warn!("patch failed to apply after passing dry run");
            let error = first_line_or(&apply.stderr, "Patch failed to apply.");
            return PatchOutcome::rejected(apply.stdout, apply.stderr, error);
        }

        debug!("patch applied");
        PatchOutcome::applied(apply.stdout, apply.stderr)
    }
}

fn first_line_or(stderr: &str, fallback: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
