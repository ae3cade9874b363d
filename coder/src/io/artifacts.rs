//! Artifact sink for `.coder/artifacts/<task-id>/<step-id>/`.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::debug;

use crate::core::sanitize::sanitize_label;

/// Writes text artifacts and hands back references relative to the repository root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let dir = root.join(".coder").join("artifacts");
        Self { root, dir }
    }

    /// Persist `contents` under a sanitized `label` and return its reference.
    ///
    /// File names are `<label>-<timestamp>.log`; a numeric suffix is added if
    /// two artifacts with the same label land on the same timestamp.
    pub fn write(&self, task_id: &str, step_id: &str, label: &str, contents: &str) -> Result<String> {
        let dir = self
            .dir
            .join(sanitize_label(task_id))
            .join(sanitize_label(step_id));
        fs::create_dir_all(&dir).with_context(|| format!("create artifact dir {}", dir.display()))?;

        let stem = format!(
            "{}-{}",
            sanitize_label(label),
            Utc::now().format("%Y%m%dT%H%M%S%.6fZ")
        );
        for suffix in 0..1000u32 {
            let name = if suffix == 0 {
                format!("{stem}.log")
            } else {
                format!("{stem}-{suffix}.log")
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(contents.as_bytes())
                        .with_context(|| format!("write artifact {}", path.display()))?;
                    let reference = self.reference(&path)?;
                    debug!(artifact = %reference, bytes = contents.len(), "artifact written");
                    return Ok(reference);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create artifact {}", path.display()));
                }
            }
        }
        Err(anyhow!("could not allocate artifact name for {stem}"))
    }

    fn reference(&self, path: &Path) -> Result<String> {
        let relative = path
            .strip_prefix(&self.root)
            .with_context(|| format!("artifact {} outside root", path.display()))?;
        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_relative_reference_with_sanitized_label() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(temp.path());

        let reference = store
            .write("T-1", "shell-1", "test stdout", "hello")
            .expect("write");

        assert!(reference.starts_with(".coder/artifacts/T-1/shell-1/test_stdout-"));
        assert!(reference.ends_with(".log"));
        assert_eq!(
            fs::read_to_string(temp.path().join(&reference)).expect("read"),
            "hello"
        );
    }

    #[test]
    fn same_label_never_overwrites() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(temp.path());

        let refs: Vec<String> = (0..5)
            .map(|i| {
                store
                    .write("T-1", "s", "diff", &format!("attempt {i}"))
                    .expect("write")
            })
            .collect();

        let mut unique = refs.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), refs.len());
        for (i, reference) in refs.iter().enumerate() {
            assert_eq!(
                fs::read_to_string(temp.path().join(reference)).expect("read"),
                format!("attempt {i}")
            );
        }
    }

    #[test]
    fn dot_ids_stay_inside_artifact_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(temp.path());

        let reference = store.write("..", "..", "stdout", "x").expect("write");

        assert!(reference.starts_with(".coder/artifacts/artifact/artifact/stdout-"));
        assert!(temp.path().join(&reference).is_file());
    }
}
