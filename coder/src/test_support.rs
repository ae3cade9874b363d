//! Helpers for tests: git fixtures, task builders and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::io::generator::{DiffGenerator, DiffRequest, GeneratedDiff, GeneratorError};
use crate::io::patch::{PatchApplier, PatchOutcome};
use crate::task::{
    StepDefinition, StepKind, SuccessCriteria, TaskDefinition, TaskPolicies,
};

/// Temporary git repository on branch `main` with one commit (`README.md` = "hi\n").
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp repo dir")?;
        let root = dir.path();
        git(root, &["init", "-q"])?;
        git(root, &["checkout", "-q", "-b", "main"])?;
        git(root, &["config", "user.email", "test@example.com"])?;
        git(root, &["config", "user.name", "test"])?;
        git(root, &["config", "commit.gpgsign", "false"])?;
        fs::write(root.join("README.md"), "hi\n").context("write README.md")?;
        git(root, &["add", "README.md"])?;
        git(root, &["commit", "-q", "-m", "init"])?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run a git command in the repository and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        git(self.path(), args)
    }
}

fn git(root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Step with the given id and kind and no optional fields.
pub fn step(id: &str, kind: StepKind) -> StepDefinition {
    StepDefinition {
        id: id.to_string(),
        kind,
        goal: format!("{id} goal"),
        depends_on: Vec::new(),
        cmd: None,
        cwd: None,
        framework: None,
        args: Vec::new(),
        changes: Vec::new(),
        diff: None,
        diff_path: None,
        on_fail: None,
    }
}

/// Task on branch `agent/<id>` cut from `main`, with default policies.
pub fn task(id: &str, steps: Vec<StepDefinition>) -> TaskDefinition {
    TaskDefinition {
        id: id.to_string(),
        title: format!("{id} title"),
        branch: format!("agent/{id}"),
        base: "main".to_string(),
        model: None,
        created_at: None,
        policies: TaskPolicies::default(),
        success: SuccessCriteria::default(),
        steps,
        metadata: None,
    }
}

/// A generated diff reply with a commit message.
pub fn generated(diff: &str, commit_message: Option<&str>) -> GeneratedDiff {
    GeneratedDiff {
        diff: diff.to_string(),
        commit_message: commit_message.map(str::to_string),
        raw_response: format!("{{\"diff\":{diff:?}}}"),
        prompt: "scripted prompt".to_string(),
    }
}

/// Generator that replays queued replies and records every request.
///
/// Once the queue is empty every call fails with a transport error.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: RefCell<VecDeque<Result<GeneratedDiff, GeneratorError>>>,
    requests: RefCell<Vec<DiffRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Result<GeneratedDiff, GeneratorError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<DiffRequest> {
        self.requests.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl DiffGenerator for ScriptedGenerator {
    fn generate(&self, request: &DiffRequest) -> Result<GeneratedDiff, GeneratorError> {
        self.requests.borrow_mut().push(request.clone());
        self.replies.borrow_mut().pop_front().unwrap_or_else(|| {
            Err(GeneratorError::Transport(
                "no scripted reply left".to_string(),
            ))
        })
    }
}

/// Patch applier that accepts or rejects without touching git, recording diffs.
pub struct ScriptedPatchApplier {
    reject_with: Option<String>,
    applied: RefCell<Vec<String>>,
}

impl ScriptedPatchApplier {
    pub fn accepting() -> Self {
        Self {
            reject_with: None,
            applied: RefCell::new(Vec::new()),
        }
    }

    pub fn rejecting(message: &str) -> Self {
        Self {
            reject_with: Some(message.to_string()),
            applied: RefCell::new(Vec::new()),
        }
    }

    pub fn diffs(&self) -> Vec<String> {
        self.applied.borrow().clone()
    }
}

impl PatchApplier for ScriptedPatchApplier {
    fn apply(&self, diff: &str) -> PatchOutcome {
        self.applied.borrow_mut().push(diff.to_string());
        match &self.reject_with {
            Some(message) => PatchOutcome::rejected(String::new(), message.clone(), message.clone()),
            None => PatchOutcome::applied(String::new(), String::new()),
        }
    }
}
