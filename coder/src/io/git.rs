//! Git adapter for the execution engine.
//!
//! The engine prepares branches, applies patches and commits step results, so we
//! keep a small, explicit wrapper around `git` subprocess calls.

use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Mode for [`Git::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// `git apply --check`: validate only, touch nothing.
    Check,
    /// `git apply --index`: update the working tree and the index.
    Index,
    /// `git apply -R --index`: undo a previously applied patch.
    Reverse,
}

/// Captured result of a `git apply` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutput {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Return the full HEAD commit id.
    pub fn head_commit(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True if the worktree has changes outside the given prefixes.
    pub fn has_changes_except_prefixes(&self, ignored_prefixes: &[&str]) -> Result<bool> {
        let entries = self.status_porcelain()?;
        Ok(entries.iter().any(|entry| {
            !ignored_prefixes
                .iter()
                .any(|prefix| entry.path.starts_with(prefix))
        }))
    }

    /// Ensure the worktree is clean, allowing entries with any of the given prefixes.
    #[instrument(skip_all)]
    pub fn ensure_clean_except_prefixes(&self, allowed_prefixes: &[&str]) -> Result<()> {
        let entries = self.status_porcelain()?;
        let mut disallowed = Vec::new();
        for entry in entries {
            if allowed_prefixes
                .iter()
                .any(|prefix| entry.path.starts_with(prefix))
            {
                continue;
            }
            disallowed.push(entry);
        }
        if disallowed.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(disallowed_count = disallowed.len(), "worktree not clean");
        let mut msg = String::new();
        msg.push_str("working tree is dirty; commit or stash changes first:\n");
        for entry in disallowed {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch = %branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Checkout `branch`, creating it at the current HEAD if absent.
    ///
    /// Returns `true` if the branch already existed.
    #[instrument(skip_all, fields(branch = %branch))]
    pub fn checkout_or_create(&self, branch: &str) -> Result<bool> {
        if self.branch_exists(branch)? {
            self.checkout_branch(branch)?;
            return Ok(true);
        }
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(false)
    }

    /// Stage all changes outside the `excluded` top-level paths (respects .gitignore).
    pub fn add_all_except(&self, excluded: &[&str]) -> Result<()> {
        let excludes: Vec<String> = excluded
            .iter()
            .map(|path| format!(":(exclude){}", path.trim_end_matches('/')))
            .collect();
        let mut args = vec!["add", "-A", "--", "."];
        args.extend(excludes.iter().map(String::as_str));
        self.run_checked(&args)?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message and return the new commit id.
    ///
    /// If there are no staged changes, this returns Ok(None) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<Option<String>> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(None);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(Some(self.head_commit()?))
    }

    /// Run `git apply` with `diff` on stdin.
    ///
    /// A rejected patch is reported through [`ApplyOutput::ok`]; `Err` means git
    /// could not be run at all.
    #[instrument(skip_all, fields(mode = ?mode))]
    pub fn apply(&self, diff: &str, mode: ApplyMode, timeout: Duration) -> Result<ApplyOutput> {
        let mode_args: &[&str] = match mode {
            ApplyMode::Check => &["--check"],
            ApplyMode::Index => &["--index"],
            ApplyMode::Reverse => &["-R", "--index"],
        };
        let mut cmd = Command::new("git");
        cmd.arg("apply")
            .args(mode_args)
            .args(["--whitespace=nowarn", "-"])
            .current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, Some(diff.as_bytes()), timeout, 1_000_000)
            .context("run git apply")?;
        let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if output.timed_out {
            stderr.push_str(&format!("\ngit apply timed out after {}s", timeout.as_secs()));
        }
        Ok(ApplyOutput {
            ok: output.status.success() && !output.timed_out,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
