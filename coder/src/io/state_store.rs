//! Task state storage (`.coder/state/<task-id>.json`).
//!
//! Every write is a full-document replace through a temp file and rename, so
//! readers never observe a partially written state.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::core::state_update::apply_step_patch;
use crate::core::types::{StepPatch, TaskState};
use crate::error::EngineError;
use crate::task::TaskDefinition;

/// Reads and writes task state documents under one state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }

    /// Create the state for `task` with every step pending, unless one exists.
    ///
    /// Returns the state on disk and whether it already existed. Creation is
    /// exclusive: of two concurrent initializers exactly one writes the file,
    /// and the other reads back what the winner wrote.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub fn initialize(
        &self,
        task: &TaskDefinition,
        branch: &str,
        base_commit: Option<String>,
    ) -> Result<(TaskState, bool)> {
        if let Some(existing) = self.load(&task.id)? {
            debug!("state already initialized");
            return Ok((existing, true));
        }

        let state = TaskState::new(&task.id, branch, base_commit, task.step_ids(), Utc::now());
        let path = self.path(&task.id);
        let tmp = self.write_temp(&state)?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                debug!(path = %path.display(), steps = state.steps.len(), "state initialized");
                Ok((state, false))
            }
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                debug!("lost initialization race; loading existing state");
                let existing = self.require(&task.id)?;
                Ok((existing, true))
            }
            Err(err) => {
                Err(err.error).with_context(|| format!("create state {}", path.display()))
            }
        }
    }

    /// Load the state for `task_id`, or `None` if it was never initialized.
    pub fn load(&self, task_id: &str) -> Result<Option<TaskState>> {
        let path = self.path(task_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read state {}", path.display()));
            }
        };
        let state: TaskState = serde_json::from_str(&contents)
            .with_context(|| format!("parse state {}", path.display()))?;
        Ok(Some(state))
    }

    /// Load the state for `task_id`, failing with
    /// [`EngineError::StateNotInitialized`] if it does not exist.
    pub fn require(&self, task_id: &str) -> Result<TaskState> {
        self.load(task_id)?.ok_or_else(|| {
            EngineError::StateNotInitialized {
                task_id: task_id.to_string(),
            }
            .into()
        })
    }

    /// Atomically replace the persisted state.
    pub fn save(&self, state: &TaskState) -> Result<()> {
        let path = self.path(&state.id);
        let tmp = self.write_temp(state)?;
        tmp.persist(&path)
            .map_err(|err| err.error)
            .with_context(|| format!("replace state {}", path.display()))?;
        Ok(())
    }

    /// Merge `patch` into one step record and persist the result.
    ///
    /// Bumps `updated_at`. Artifacts are unioned with what is already stored.
    #[instrument(skip_all, fields(task_id = %task_id, step_id = %step_id))]
    pub fn update_step(&self, task_id: &str, step_id: &str, patch: StepPatch) -> Result<TaskState> {
        let mut state = self.require(task_id)?;
        let record = state
            .steps
            .get_mut(step_id)
            .ok_or_else(|| EngineError::StepNotFound {
                task_id: task_id.to_string(),
                step_id: step_id.to_string(),
            })?;
        apply_step_patch(record, patch);
        debug!(status = record.status.as_str(), "step updated");
        state.updated_at = Utc::now();
        self.save(&state)?;
        Ok(state)
    }

    /// Refresh `updated_at` without touching any step.
    pub fn touch(&self, task_id: &str) -> Result<TaskState> {
        let mut state = self.require(task_id)?;
        state.updated_at = Utc::now();
        self.save(&state)?;
        Ok(state)
    }

    fn write_temp(&self, state: &TaskState) -> Result<NamedTempFile> {
        ensure_dir(&self.dir)?;
        let mut buf = serde_json::to_string_pretty(state)?;
        buf.push('\n');
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("create temp state in {}", self.dir.display()))?;
        tmp.write_all(buf.as_bytes())
            .with_context(|| format!("write temp state {}", tmp.path().display()))?;
        Ok(tmp)
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StepStatus;
    use crate::task::StepKind;
    use crate::test_support::{step, task};
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn sample_task() -> TaskDefinition {
        task(
            "T-1",
            vec![step("a", StepKind::Analyze), step("b", StepKind::Shell)],
        )
    }

    #[test]
    fn initialize_creates_pending_state_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("state"));

        let (state, existed) = store
            .initialize(&sample_task(), "agent/t", Some("abc".to_string()))
            .expect("init");
        assert!(!existed);
        assert_eq!(state.base_commit.as_deref(), Some("abc"));
        assert_eq!(state.steps["a"].status, StepStatus::Pending);

        store
            .update_step("T-1", "a", StepPatch {
                status: Some(StepStatus::Success),
                ..StepPatch::default()
            })
            .expect("update");

        let (again, existed) = store
            .initialize(&sample_task(), "other", None)
            .expect("reinit");
        assert!(existed);
        assert_eq!(again.branch, "agent/t");
        assert_eq!(again.steps["a"].status, StepStatus::Success);
    }

    #[test]
    fn concurrent_initialize_yields_one_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("state"));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store
                        .initialize(&sample_task(), &format!("branch-{i}"), None)
                        .expect("init")
                })
            })
            .collect();
        let results: Vec<(TaskState, bool)> = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect();

        assert_eq!(results.iter().filter(|(_, existed)| !existed).count(), 1);
        let on_disk = store.require("T-1").expect("load");
        assert!(results.iter().all(|(state, _)| state.branch == on_disk.branch));
    }

    #[test]
    fn update_unions_artifacts_and_bumps_timestamp() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());
        let (initial, _) = store.initialize(&sample_task(), "agent/t", None).expect("init");

        store
            .update_step("T-1", "b", StepPatch {
                artifacts: vec!["x".to_string(), "y".to_string()],
                ..StepPatch::default()
            })
            .expect("first");
        let state = store
            .update_step("T-1", "b", StepPatch {
                artifacts: vec!["y".to_string(), "z".to_string()],
                ..StepPatch::default()
            })
            .expect("second");

        assert_eq!(state.steps["b"].artifacts, vec!["x", "y", "z"]);
        assert!(state.updated_at >= initial.updated_at);
        assert_eq!(store.require("T-1").expect("load"), state);
    }

    #[test]
    fn unknown_step_is_step_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());
        store.initialize(&sample_task(), "agent/t", None).expect("init");

        let err = store
            .update_step("T-1", "nope", StepPatch::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::StepNotFound { step_id, .. }) if step_id == "nope"
        ));
    }

    #[test]
    fn missing_state_is_not_initialized() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());

        assert!(store.load("T-9").expect("load").is_none());
        let err = store.require("T-9").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::StateNotInitialized { .. })
        ));
    }

    #[test]
    fn saved_state_is_pretty_json_with_trailing_newline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());
        store.initialize(&sample_task(), "agent/t", None).expect("init");

        let contents = fs::read_to_string(store.path("T-1")).expect("read");
        assert!(contents.starts_with("{\n  \"id\": \"T-1\""));
        assert!(contents.ends_with("}\n"));
    }
}
