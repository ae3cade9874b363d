//! Canonical `.coder/` layout and workspace scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::config::{EngineConfig, write_config};

/// Runtime output that never belongs in task commits.
const CODER_GITIGNORE: &str = "state/\nartifacts/\nlogs/\n";

/// All canonical paths within `.coder/` for a project root.
#[derive(Debug, Clone)]
pub struct CoderPaths {
    pub root: PathBuf,
    pub coder_dir: PathBuf,
    pub tasks_dir: PathBuf,
    pub state_dir: PathBuf,
    pub patches_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
}

impl CoderPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let coder_dir = root.join(".coder");
        Self {
            root: root.clone(),
            coder_dir: coder_dir.clone(),
            tasks_dir: coder_dir.join("tasks"),
            state_dir: coder_dir.join("state"),
            patches_dir: coder_dir.join("patches"),
            artifacts_dir: coder_dir.join("artifacts"),
            logs_dir: coder_dir.join("logs"),
            gitignore_path: coder_dir.join(".gitignore"),
            config_path: coder_dir.join("config.toml"),
        }
    }

    pub fn task_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir.join(format!("{task_id}.json"))
    }

    pub fn state_path(&self, task_id: &str) -> PathBuf {
        self.state_dir.join(format!("{task_id}.json"))
    }

    /// Conventional diff location for a step without an inline or referenced diff.
    pub fn fallback_patch_path(&self, task_id: &str, step_id: &str) -> PathBuf {
        self.patches_dir.join(task_id).join(format!("{step_id}.diff"))
    }

    pub fn log_path(&self, task_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{task_id}.jsonl"))
    }
}

/// Create the `.coder/` directories and `.gitignore` if missing.
///
/// Existing files are left untouched. With `write_default_config`, a default
/// `config.toml` is written when none exists.
pub fn ensure_workspace(root: &Path, write_default_config: bool) -> Result<CoderPaths> {
    let paths = CoderPaths::new(root);
    for dir in [
        &paths.coder_dir,
        &paths.tasks_dir,
        &paths.state_dir,
        &paths.patches_dir,
        &paths.artifacts_dir,
        &paths.logs_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    if !paths.gitignore_path.exists() {
        debug!(path = %paths.gitignore_path.display(), "writing .coder/.gitignore");
        fs::write(&paths.gitignore_path, CODER_GITIGNORE)
            .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    }
    if write_default_config && !paths.config_path.exists() {
        write_config(&paths.config_path, &EngineConfig::default())?;
    }
    Ok(paths)
}
