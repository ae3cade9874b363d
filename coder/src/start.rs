//! Orchestration for initializing a task run.
//!
//! Initialization prepares git (clean tree, base branch, task branch) and
//! creates the task state. It is a no-op once state exists, which is what
//! makes `coder resume` safe to call repeatedly.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::types::TaskState;
use crate::io::git::Git;
use crate::io::init::{CoderPaths, ensure_workspace};
use crate::io::state_store::StateStore;
use crate::io::task_store::load_task;

/// Outcome of [`initialize_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInit {
    pub state: TaskState,
    /// True if state already existed and git was left untouched.
    pub already_initialized: bool,
}

/// Initialize execution state for `task_id` under `paths.root`.
///
/// - Returns existing state unchanged if the task was initialized before.
/// - Otherwise requires a clean working tree (outside `.coder/`), checks out
///   the base branch and records its head as the base commit, then checks out
///   the task branch, creating it from the base if absent.
pub fn initialize_run(paths: &CoderPaths, task_id: &str) -> Result<RunInit> {
    let task = load_task(paths, task_id)?;
    let store = StateStore::new(&paths.state_dir);
    if let Some(state) = store.load(task_id)? {
        debug!(task_id, "state exists; skipping git preparation");
        return Ok(RunInit {
            state,
            already_initialized: true,
        });
    }

    ensure_workspace(&paths.root, false)?;
    let git = Git::new(&paths.root);
    git.ensure_clean_except_prefixes(&[".coder/"])?;
    git.checkout_branch(&task.base)
        .with_context(|| format!("checkout base branch {}", task.base))?;
    let base_commit = git.head_commit()?;
    let existed = git
        .checkout_or_create(&task.branch)
        .with_context(|| format!("checkout task branch {}", task.branch))?;
    debug!(branch = %task.branch, existed, "task branch ready");

    let (state, already_initialized) =
        store.initialize(&task, &task.branch, Some(base_commit.clone()))?;
    info!(
        task_id,
        branch = %task.branch,
        base_commit = %base_commit,
        steps = state.steps.len(),
        "run initialized"
    );
    Ok(RunInit {
        state,
        already_initialized,
    })
}
